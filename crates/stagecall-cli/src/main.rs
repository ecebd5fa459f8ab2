use clap::{Parser, Subcommand};
use stagecall_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod viewer;

#[derive(Parser)]
#[command(name = "stagecall", version, about = "Stagecall CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script headless with an automated viewer
    Run(commands::run::RunArgs),
    /// Inspect and validate script libraries
    Scripts {
        #[command(subcommand)]
        action: commands::scripts::ScriptsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let fallback = Config::load_or_default().logging.filter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Scripts { action } => commands::scripts::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
