//! Daemon entrypoint: run one manager for one domain until it finishes.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobvisor::{Domain, Manager};

#[derive(Parser, Debug)]
#[command(name = "jobvisord", version, about = "Per-domain service manager")]
struct Args {
    /// Domain name; determines default state and manifest paths.
    #[arg(long, default_value = "jobvisor")]
    domain: String,

    /// Manage the system-wide domain instead of the per-user one.
    #[arg(long)]
    system: bool,

    /// Override the state directory.
    #[arg(long)]
    statedir: Option<PathBuf>,

    /// Additional manifest directory; may be given multiple times.
    #[arg(long = "load-path")]
    load_paths: Vec<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn domain(&self) -> Domain {
        let base = if self.system {
            Domain::system(&self.domain)
        } else {
            Domain::user(&self.domain)
        };
        let statedir = self
            .statedir
            .clone()
            .unwrap_or_else(|| base.statedir().to_path_buf());
        let mut load_paths = base.load_paths().to_vec();
        load_paths.extend(self.load_paths.iter().cloned());
        Domain::new(&self.domain, statedir, load_paths)
    }

    fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.default_log_level())),
        )
        .init();

    let domain = args.domain();
    info!(domain = %domain, statedir = %domain.statedir().display(), "starting");

    let mut manager = Manager::new(domain)?;
    manager.start_running()?;
    manager.run_main_loop().await?;

    info!("manager finished");
    Ok(())
}
