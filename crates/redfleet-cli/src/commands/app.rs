use redfleet_registry::NewApplication;

use super::{print_json, Context};

pub fn create(
    ctx: &Context,
    slug: String,
    name: String,
    description: Option<String>,
    color: Option<String>,
) -> anyhow::Result<()> {
    let mut input = NewApplication::new(slug, name);
    input.description = description;
    input.color = color;
    let app = ctx.fleet.applications.create(input)?;
    print_json(&app)
}

pub fn list(ctx: &Context, active_only: bool) -> anyhow::Result<()> {
    print_json(&ctx.fleet.applications.list(active_only)?)
}

pub fn delete(ctx: &Context, slug: &str, purge: bool) -> anyhow::Result<()> {
    let app = ctx.application(slug)?;
    if purge {
        ctx.fleet.applications.purge(app.id)?;
        println!("✓ Purged application {slug}");
    } else {
        ctx.fleet.applications.soft_delete(app.id)?;
        println!("✓ Deleted application {slug}");
    }
    Ok(())
}
