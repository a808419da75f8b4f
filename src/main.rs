// generate-secrets - provision installation-scoped secrets
//
// This is the main entry point for the application.

use anyhow::Result;
use clap::{ArgGroup, Parser};
use generate_secrets::config::{Mode, RunConfig};
use tracing_subscriber::EnvFilter;

/// Generate any missing secrets into the secrets configuration file
#[derive(Parser, Debug)]
#[command(name = "generate-secrets")]
#[command(version)]
#[command(about = "Generate missing installation secrets", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["development", "production"])))]
struct Cli {
    /// For setting up the developer environment
    #[arg(long)]
    development: bool,

    /// For setting up a production server
    #[arg(long)]
    production: bool,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.development {
            Mode::Development
        } else {
            Mode::Production
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = RunConfig::from_env(cli.mode());
    tracing::debug!(?config, "resolved run configuration");

    generate_secrets::provision::run(&config)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
