use redfleet_core::{epoch_secs, parse_duration};
use redfleet_health::HealthSchedule;
use redfleet_registry::HealthLogQuery;
use redfleet_state::{AuditEvent, HealthState};
use tracing::info;

use super::{print_json, Context};

pub fn logs(
    ctx: &Context,
    conn: &str,
    status: Option<&str>,
    hours: Option<u64>,
    limit: usize,
) -> anyhow::Result<()> {
    let conn = ctx.connection(conn)?;
    let query = HealthLogQuery {
        status: status
            .map(str::parse::<HealthState>)
            .transpose()
            .map_err(anyhow::Error::msg)?,
        since: hours.map(|h| since_hours(epoch_secs(), h)),
        until: None,
        limit: Some(limit),
    };
    print_json(&ctx.fleet.connections.health_logs(conn.id, &query)?)
}

/// Start of a window reaching `hours` back from `now`, clamped at the epoch.
fn since_hours(now: u64, hours: u64) -> u64 {
    now.saturating_sub(hours.saturating_mul(3600))
}

pub fn parse_event(raw: &str) -> AuditEvent {
    match raw {
        "created" => AuditEvent::Created,
        "updated" => AuditEvent::Updated,
        "deleted" => AuditEvent::Deleted,
        "restored" => AuditEvent::Restored,
        other => AuditEvent::Custom(other.to_string()),
    }
}

pub fn audit(
    ctx: &Context,
    days: u64,
    causer: Option<String>,
    event: Option<String>,
    log: Option<String>,
) -> anyhow::Result<()> {
    let event = event.as_deref().map(parse_event);
    let mut entries = ctx.fleet.audit.recent(days)?;
    entries.retain(|e| {
        causer.as_ref().is_none_or(|c| e.causer.as_ref() == Some(c))
            && event.as_ref().is_none_or(|ev| &e.event == ev)
            && log.as_ref().is_none_or(|l| e.log_name.as_ref() == Some(l))
    });
    print_json(&entries)
}

/// Probe the active fleet on an interval until Ctrl-C.
pub async fn watch(ctx: &Context, interval: Option<&str>) -> anyhow::Result<()> {
    let interval = match interval {
        Some(raw) => parse_duration(raw).ok_or_else(|| anyhow::anyhow!("invalid interval {raw:?}"))?,
        None => ctx.config.watch_interval()?,
    };
    let handle = HealthSchedule::new(ctx.prober()?, interval).spawn();

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    let rounds = handle.stop().await;
    println!("✓ Stopped after {rounds} round(s)");
    Ok(())
}
