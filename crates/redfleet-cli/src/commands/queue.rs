use redfleet_registry::NewQueueConfig;
use redfleet_resolver::WorkerConfigResolver;
use redfleet_state::{BalanceStrategy, QueueName};
use serde_json::json;

use super::{print_json, Context};

/// Worker limits from the command line; `None` takes the default.
pub struct Limits {
    pub balance: Option<String>,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub tries: Option<u32>,
    pub timeout: Option<u32>,
    pub memory: Option<u32>,
}

/// Parse `name` or `name:priority`. A bare name gets priority 1.
pub fn parse_queue(raw: &str) -> anyhow::Result<QueueName> {
    match raw.rsplit_once(':') {
        Some((name, priority)) => {
            let priority = priority
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid queue priority in {raw:?}"))?;
            Ok(QueueName::new(name, priority))
        }
        None => Ok(QueueName::new(raw, 1)),
    }
}

pub fn add(ctx: &Context, app: &str, conn: &str, queues: &[String], limits: Limits) -> anyhow::Result<()> {
    let app = ctx.application(app)?;
    let conn = ctx.connection(conn)?;
    let queue_names = queues
        .iter()
        .map(|q| parse_queue(q))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut input = NewQueueConfig::new(app.id, conn.id, queue_names);
    input.balance_strategy = limits
        .balance
        .as_deref()
        .map(str::parse::<BalanceStrategy>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    input.min_processes = limits.min;
    input.max_processes = limits.max;
    input.tries = limits.tries;
    input.timeout = limits.timeout;
    input.memory = limits.memory;

    print_json(&ctx.fleet.queues.create(input)?)
}

pub fn list(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let app = ctx.application(app)?;
    print_json(&ctx.fleet.queues.list_for_application(app.id)?)
}

/// Print resolved worker specs with passwords masked. Unresolvable
/// configurations are reported alongside the resolvable ones.
pub fn resolve(ctx: &Context, app: &str, id: Option<u64>) -> anyhow::Result<()> {
    let app = ctx.application(app)?;
    let resolver = WorkerConfigResolver::new(ctx.fleet.connections.clone());

    if let Some(id) = id {
        let config = ctx.fleet.queues.get(id)?;
        if config.application_id != app.id {
            anyhow::bail!("queue configuration {id} does not belong to {}", app.slug);
        }
        let spec = resolver.resolve_config(&config)?;
        return print_json(&spec.redacted());
    }

    let results: Vec<_> = resolver
        .resolve_for_application(app.id)?
        .into_iter()
        .map(|(id, result)| match result {
            Ok(spec) => json!({ "id": id, "spec": spec.redacted() }),
            Err(e) => json!({ "id": id, "error": e.to_string() }),
        })
        .collect();
    print_json(&results)
}
