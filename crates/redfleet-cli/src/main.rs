use std::path::PathBuf;

use clap::{Parser, Subcommand};
use redfleet_core::{FleetConfig, LogFormat};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "redfleet",
    about = "redfleet: Redis connection fleet registry",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to redfleet.toml
    #[arg(short, long, global = true, default_value = "redfleet.toml")]
    config: PathBuf,
    /// Operator recorded as the causer of audit entries
    #[arg(long, global = true)]
    actor: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a redfleet.toml scaffold and create the state store
    Init {
        /// State store path written into the scaffold
        #[arg(long, default_value = "redfleet.redb")]
        store: PathBuf,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print a fresh base64 vault key
    Keygen,
    #[command(flatten)]
    Fleet(FleetCommand),
}

/// Commands that need an opened state store.
#[derive(Subcommand)]
enum FleetCommand {
    /// Manage applications
    App {
        #[command(subcommand)]
        action: AppAction,
    },
    /// Manage Redis connections
    Conn {
        #[command(subcommand)]
        action: ConnAction,
    },
    /// Bind a connection to an application, or update an existing binding
    Bind {
        app: String,
        conn: String,
        #[arg(short, long)]
        priority: Option<u32>,
        /// Keep the binding but exclude it from selection
        #[arg(long)]
        inactive: bool,
        /// Remove the binding instead
        #[arg(long, conflicts_with_all = ["priority", "inactive"])]
        detach: bool,
    },
    /// Make a connection the application's primary
    Primary { app: String, conn: String },
    /// Show which connection an application would use right now
    Which { app: String },
    /// Manage queue configurations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Resolve worker specs for an application
    Resolve {
        app: String,
        /// Resolve a single queue configuration by id
        #[arg(long)]
        id: Option<u64>,
    },
    /// Show a connection's health history, newest first
    Logs {
        conn: String,
        /// Only entries with this status
        #[arg(long)]
        status: Option<String>,
        /// Only entries from the last N hours
        #[arg(long)]
        hours: Option<u64>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show recent audit entries
    Audit {
        #[arg(long, default_value = "7")]
        days: u64,
        #[arg(long)]
        causer: Option<String>,
        /// created, updated, deleted, restored, or a custom event name
        #[arg(long)]
        event: Option<String>,
        /// applications, redis_connections, bindings, queue_configurations
        #[arg(long)]
        log: Option<String>,
    },
    /// Probe every active connection on an interval until Ctrl-C
    Watch {
        /// Overrides [watch].interval, e.g. 30s or 2m
        #[arg(long)]
        interval: Option<String>,
    },
}

#[derive(Subcommand)]
enum AppAction {
    /// Register an application
    Create {
        slug: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// List applications
    List {
        /// Include inactive applications
        #[arg(long)]
        all: bool,
    },
    /// Soft-delete an application
    Delete {
        slug: String,
        /// Remove it and its bindings and queue configurations for good
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Subcommand)]
enum ConnAction {
    /// Register a connection; the password is sealed before it is stored
    Add {
        name: String,
        host: String,
        #[arg(short, long, default_value = "6379")]
        port: u32,
        #[arg(short, long, default_value = "0")]
        database: u32,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Connect with TLS (rediss)
        #[arg(long)]
        tls: bool,
        #[arg(long)]
        environment: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        provider: Option<String>,
    },
    /// List connections
    List {
        #[arg(long)]
        environment: Option<String>,
        #[arg(long)]
        health: Option<String>,
        /// Include soft-deleted connections
        #[arg(long)]
        all: bool,
    },
    /// Probe one connection now
    Test { name: String },
    /// Probe every active connection now
    TestAll,
    /// Soft-delete a connection
    Delete {
        name: String,
        /// Remove it and its bindings, queue configurations and health logs
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Add a queue configuration; queues are name[:priority]
    Add {
        app: String,
        conn: String,
        #[arg(required = true)]
        queues: Vec<String>,
        #[arg(long)]
        balance: Option<String>,
        #[arg(long)]
        min: Option<u32>,
        #[arg(long)]
        max: Option<u32>,
        #[arg(long)]
        tries: Option<u32>,
        #[arg(long)]
        timeout: Option<u32>,
        #[arg(long)]
        memory: Option<u32>,
    },
    /// List an application's queue configurations
    List { app: String },
}

fn init_tracing(config: &FleetConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_filter()))?;
    // Logs go to stderr; stdout carries command output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format() {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = FleetConfig::load_or_default(&cli.config)?;
    init_tracing(&config)?;

    match cli.command {
        Commands::Init { store, force } => commands::setup::init(&cli.config, &store, force),
        Commands::Keygen => commands::setup::keygen(),
        Commands::Fleet(command) => {
            let ctx = Context::open(config, cli.actor.as_deref())?;
            run(&ctx, command).await
        }
    }
}

async fn run(ctx: &Context, command: FleetCommand) -> anyhow::Result<()> {
    match command {
        FleetCommand::App { action } => match action {
            AppAction::Create {
                slug,
                name,
                description,
                color,
            } => commands::app::create(ctx, slug, name, description, color),
            AppAction::List { all } => commands::app::list(ctx, !all),
            AppAction::Delete { slug, purge } => commands::app::delete(ctx, &slug, purge),
        },
        FleetCommand::Conn { action } => match action {
            ConnAction::Add {
                name,
                host,
                port,
                database,
                username,
                password,
                tls,
                environment,
                region,
                provider,
            } => {
                let mut input = redfleet_registry::NewConnection::new(name, host);
                input.port = port;
                input.database = database;
                input.password = password;
                input.environment = environment;
                input.region = region;
                input.provider = provider;
                if let Some(username) = username {
                    input.options.insert("username".to_string(), username);
                }
                if tls {
                    input.options.insert("tls".to_string(), "true".to_string());
                }
                commands::conn::add(ctx, input)
            }
            ConnAction::List {
                environment,
                health,
                all,
            } => commands::conn::list(ctx, environment, health.as_deref(), all),
            ConnAction::Test { name } => commands::conn::test(ctx, &name).await,
            ConnAction::TestAll => commands::conn::test_all(ctx).await,
            ConnAction::Delete { name, purge } => commands::conn::delete(ctx, &name, purge),
        },
        FleetCommand::Bind {
            app,
            conn,
            priority,
            inactive,
            detach,
        } => {
            if detach {
                commands::bind::detach(ctx, &app, &conn)
            } else {
                commands::bind::attach(ctx, &app, &conn, priority, !inactive)
            }
        }
        FleetCommand::Primary { app, conn } => commands::bind::primary(ctx, &app, &conn),
        FleetCommand::Which { app } => commands::bind::which(ctx, &app),
        FleetCommand::Queue { action } => match action {
            QueueAction::Add {
                app,
                conn,
                queues,
                balance,
                min,
                max,
                tries,
                timeout,
                memory,
            } => commands::queue::add(
                ctx,
                &app,
                &conn,
                &queues,
                commands::queue::Limits {
                    balance,
                    min,
                    max,
                    tries,
                    timeout,
                    memory,
                },
            ),
            QueueAction::List { app } => commands::queue::list(ctx, &app),
        },
        FleetCommand::Resolve { app, id } => commands::queue::resolve(ctx, &app, id),
        FleetCommand::Logs {
            conn,
            status,
            hours,
            limit,
        } => commands::health::logs(ctx, &conn, status.as_deref(), hours, limit),
        FleetCommand::Audit {
            days,
            causer,
            event,
            log,
        } => commands::health::audit(ctx, days, causer, event, log),
        FleetCommand::Watch { interval } => commands::health::watch(ctx, interval.as_deref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn setup_and_fleet_commands_parse_to_their_own_variants() {
        let cli = Cli::try_parse_from(["redfleet", "keygen"]).unwrap();
        assert!(matches!(cli.command, Commands::Keygen));

        let cli = Cli::try_parse_from(["redfleet", "which", "billing"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Fleet(FleetCommand::Which { ref app }) if app == "billing"
        ));

        let cli = Cli::try_parse_from(["redfleet", "conn", "test-all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Fleet(FleetCommand::Conn {
                action: ConnAction::TestAll
            })
        ));
    }
}
