use redfleet_registry::{ConnectionFilter, NewConnection};
use redfleet_state::HealthState;

use super::{print_json, redact_connection, Context};

pub fn add(ctx: &Context, input: NewConnection) -> anyhow::Result<()> {
    let conn = ctx.fleet.connections.create(input)?;
    print_json(&redact_connection(&conn)?)
}

pub fn list(
    ctx: &Context,
    environment: Option<String>,
    health: Option<&str>,
    include_deleted: bool,
) -> anyhow::Result<()> {
    let filter = ConnectionFilter {
        active: None,
        health: health
            .map(str::parse::<HealthState>)
            .transpose()
            .map_err(anyhow::Error::msg)?,
        environment,
        include_deleted,
    };
    let conns = ctx.fleet.connections.list(&filter)?;
    let views = conns
        .iter()
        .map(redact_connection)
        .collect::<anyhow::Result<Vec<_>>>()?;
    print_json(&views)
}

pub async fn test(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let conn = ctx.connection(name)?;
    let log = ctx.prober()?.probe(&conn).await;
    print_json(&log)?;
    if log.status != HealthState::Healthy {
        anyhow::bail!("connection {name} is {}", log.status);
    }
    Ok(())
}

pub async fn test_all(ctx: &Context) -> anyhow::Result<()> {
    let conns = ctx.fleet.connections.list(&ConnectionFilter::active())?;
    let report = ctx.prober()?.probe_all(conns).await;
    print_json(&report.results)?;
    println!("{}/{} healthy", report.succeeded, report.total);
    if report.failed() > 0 {
        anyhow::bail!("{} connection(s) failed their probe", report.failed());
    }
    Ok(())
}

pub fn delete(ctx: &Context, name: &str, purge: bool) -> anyhow::Result<()> {
    let conn = ctx.connection(name)?;
    if purge {
        ctx.fleet.connections.purge(conn.id)?;
        println!("✓ Purged connection {name}");
    } else {
        ctx.fleet.connections.soft_delete(conn.id)?;
        println!("✓ Deleted connection {name}");
    }
    Ok(())
}
