//! `nexus-gatewayd` — the gateway's HTTP daemon entry point.
//!
//! Exit codes (spec §6): `0` normal shutdown, `1` fatal config/bootstrap
//! error, `2` every candidate port was already in use.

use std::sync::OnceLock;

use clap::{Parser, Subcommand};
use nexus_gateway::config;
use nexus_gateway::gateway;

// Keeps the non-blocking file-appender writer alive for the process lifetime.
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "nexus-gatewayd", version, about = "Multi-provider LLM gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway and block until shutdown (the default).
    Serve,
    /// Print the local admin token used to authenticate config CRUD routes.
    ShowToken,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = config::load_default_config();

    init_tracing(&cfg.logging.level);

    let code = match cli.command.unwrap_or(Commands::Serve) {
        Commands::ShowToken => match gateway::auth::load_or_create_token() {
            Ok(token) => {
                println!("{token}");
                0
            }
            Err(err) => {
                eprintln!("error: {err}");
                1
            }
        },
        Commands::Serve => match gateway::serve(cfg).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("error: {err}");
                err.exit_code()
            }
        },
    };

    std::process::exit(code);
}

/// Rolling daily log file under `~/.nexus-gateway/`, alongside stdout,
/// grounded on the teacher's `plugins/logging.rs::init` (file appender +
/// kept-alive `WorkerGuard`, `EnvFilter` from `RUST_LOG`/`level`).
fn init_tracing(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = config::app_dir().ok().map(|dir| {
        let _ = std::fs::create_dir_all(&dir);
        let file_appender = tracing_appender::rolling::daily(&dir, "gateway.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .ok();
}
