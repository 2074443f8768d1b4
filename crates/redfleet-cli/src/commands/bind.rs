use redfleet_registry::AttachOptions;
use serde_json::json;

use super::{print_json, redact_connection, Context};

pub fn attach(
    ctx: &Context,
    app: &str,
    conn: &str,
    priority: Option<u32>,
    active: bool,
) -> anyhow::Result<()> {
    let app = ctx.application(app)?;
    let conn = ctx.connection(conn)?;
    let binding = ctx.fleet.bindings.attach(
        app.id,
        conn.id,
        AttachOptions {
            priority,
            active: Some(active),
        },
    )?;
    print_json(&binding)
}

pub fn detach(ctx: &Context, app: &str, conn: &str) -> anyhow::Result<()> {
    let application = ctx.application(app)?;
    let connection = ctx.connection(conn)?;
    ctx.fleet.bindings.detach(application.id, connection.id)?;
    println!("✓ Detached {conn} from {app}");
    Ok(())
}

pub fn primary(ctx: &Context, app: &str, conn: &str) -> anyhow::Result<()> {
    let application = ctx.application(app)?;
    let connection = ctx.connection(conn)?;
    let binding = ctx.fleet.bindings.set_primary(application.id, connection.id)?;
    print_json(&binding)
}

/// Resolve the connection an application would use now and record the use.
pub fn which(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let application = ctx.application(app)?;
    let (binding, conn) = ctx.fleet.bindings.resolve_binding(application.id)?;
    ctx.fleet.bindings.touch_usage(&binding);
    print_json(&json!({
        "application": application.slug,
        "binding": binding,
        "connection": redact_connection(&conn)?,
    }))
}
