mod auth_commands;
mod context;
mod room_commands;
mod server_commands;

use std::path::PathBuf;

use {
    anyhow::Context as _,
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::context::Context;

#[derive(Parser)]
#[command(name = "synadmin", about = "synadmin, administration console for Synapse homeservers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Print results as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Config file (toml, yaml or json). Defaults to the platform config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to a homeserver and manage stored credentials.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// List, inspect and delete rooms.
    Rooms {
        #[command(subcommand)]
        action: room_commands::RoomAction,
    },
    /// Server version, edition and feature availability.
    Server {
        #[command(subcommand)]
        action: server_commands::ServerAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Cancel `token` on Ctrl-C so in-flight requests and polls stop.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, cancelling");
                token.cancel();
            },
            Err(e) => warn!(%e, "failed to listen for Ctrl-C"),
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "synadmin starting");

    let config = synadmin_config::discover_and_load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let ctx = Context::new(config, cli.json, cancel)?;

    match cli.command {
        Commands::Auth { action } => auth_commands::handle_auth(&ctx, action).await,
        Commands::Rooms { action } => room_commands::handle_rooms(&ctx, action).await,
        Commands::Server { action } => server_commands::handle_server(&ctx, action).await,
    }
}
