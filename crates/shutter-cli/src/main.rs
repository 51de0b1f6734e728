mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, device::DeviceSubcommand, request::RequestSubcommand};
use shutter_core::config::ConvergenceMode;
use shutter_core::meta::ObjectKey;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shutterd",
    about = "Roller-shutter controller: converge devices onto requested positions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Store directory (default: nearest .shutter/ upward from the current directory)
    #[arg(long, global = true, env = "SHUTTER_STORE")]
    store: Option<PathBuf>,

    /// Controller config file (default: <store>/config.yaml)
    #[arg(long, global = true, env = "SHUTTER_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Override the number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Override the convergence mode: requests or direct
        #[arg(long)]
        mode: Option<ConvergenceMode>,
    },

    /// Run a single reconciliation pass for one device
    Reconcile {
        /// Device key: <namespace>/<name> or <name>
        device: ObjectKey,
    },

    /// Garbage-collect completed requests beyond the history limit
    Gc {
        /// Only this namespace (default: all)
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Manage RollerShutter devices
    Device {
        #[command(subcommand)]
        subcommand: DeviceSubcommand,
    },

    /// Manage RollerShutterRequests
    Request {
        #[command(subcommand)]
        subcommand: RequestSubcommand,
    },

    /// Inspect and validate the controller config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let paths = root::resolve(cli.store.as_deref(), cli.config.as_deref());

    let result = match cli.command {
        Commands::Run { workers, mode } => cmd::run::run(&paths, workers, mode),
        Commands::Reconcile { device } => cmd::reconcile::run(&paths, &device, cli.json),
        Commands::Gc { namespace } => cmd::gc::run(&paths, namespace.as_deref(), cli.json),
        Commands::Device { subcommand } => cmd::device::run(&paths, subcommand, cli.json),
        Commands::Request { subcommand } => cmd::request::run(&paths, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&paths, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
