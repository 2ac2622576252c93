//! tracewatch - remote-session and config-edit monitor.
//!
//! Single binary. Runs in the foreground; service installation is left to
//! the host's service manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tracewatch::clock::SystemClock;
use tracewatch::notifier::WebhookNotifier;
use tracewatch::shutdown::Shutdown;
use tracewatch::{daemon, diff, Config, Error};

#[derive(Parser)]
#[command(name = "tracewatch")]
#[command(about = "Remote-session login/logout and config-file change monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor in the foreground (default)
    Run {
        /// Config file (defaults to config.toml beside the executable)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Print version information
    Version,

    /// Print the structural diff between two YAML documents
    Diff { old: PathBuf, new: PathBuf },
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { config: None }) {
        Commands::Run { config } => run(config.as_deref()),
        Commands::Version => {
            println!(
                "{} v{} - {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_DESCRIPTION")
            );
            Ok(())
        }
        Commands::Diff { old, new } => {
            let old = std::fs::read_to_string(old)?;
            let new = std::fs::read_to_string(new)?;
            print!("{}", diff::change_report(&old, &new));
            Ok(())
        }
    }
}

fn run(config_path: Option<&Path>) -> Result<(), Error> {
    let (config, source) = Config::load(config_path);
    let _guard = init_logging(&config.app_log_file);
    source.log();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), Error> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting tracewatch");
    info!(
        vm = %config.vm_name,
        webhook_configured = !config.webhook_url.is_empty(),
        "Loaded configuration"
    );

    let notifier = WebhookNotifier::new(&config.webhook_url, config.webhook_timeout())?;
    if !notifier.is_configured() {
        warn!("No webhook_url configured; alerts will only be logged as delivery failures");
    }

    let shutdown = Shutdown::new();
    let running = daemon::start(&config, Arc::new(notifier), Arc::new(SystemClock), &shutdown);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Stopping tracewatch");
    shutdown.trigger();

    if let Some(stats) = running.join().await? {
        info!(
            evaluations = stats.evaluations,
            changes = stats.changes,
            delivery_failures = stats.delivery_failures,
            "File watcher summary"
        );
    }
    Ok(())
}

/// Log to stderr, and to `app_log_file` when one is configured.
fn init_logging(app_log_file: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tracewatch=info"));

    let (file_layer, guard) = match open_log_target(app_log_file) {
        Some((dir, name)) => {
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn open_log_target(path: &Path) -> Option<(PathBuf, PathBuf)> {
    let name = PathBuf::from(path.file_name()?);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("Failed to create log directory {}: {}", dir.display(), e);
        return None;
    }
    Some((dir, name))
}
