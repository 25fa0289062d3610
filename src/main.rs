use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use layersweep::cmd;

#[derive(Parser)]
#[command(name = "layersweep")]
#[command(about = "Scans container image archives for leaked secrets")]
#[command(version)]
struct Cli {
    /// Detection engine adapter binary
    #[arg(
        long,
        global = true,
        env = "LAYERSWEEP_ENGINE",
        default_value = "secrets-engine"
    )]
    engine: String,

    /// Timeout in seconds for each docker invocation
    #[arg(long, global = true, default_value_t = 360)]
    timeout: u64,

    /// Exclude paths matching a wildcard (repeatable)
    #[arg(long = "exclude", global = true)]
    excludes: Vec<String>,

    /// JSON file of previously accepted matches to ignore
    #[arg(long, global = true)]
    ignore_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Image name or path to a tar archive (shorthand for `layersweep scan <image>`)
    image: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a container image or an exported archive
    Scan {
        /// Image name or path to a tar archive
        image: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // `layersweep <image>` is shorthand for `layersweep scan <image>`
    let target = match &cli.command {
        Some(Commands::Scan { image }) => Some(image.clone()),
        None => cli.image.clone(),
    };

    let Some(target) = target else {
        Cli::parse_from(["layersweep", "--help"]);
        return Ok(());
    };

    let found_secrets = cmd::scan::run(&cmd::scan::ScanArgs {
        target: &target,
        engine: &cli.engine,
        timeout: Duration::from_secs(cli.timeout),
        excludes: &cli.excludes,
        ignore_file: cli.ignore_file.as_deref(),
    })?;

    if found_secrets {
        std::process::exit(1);
    }
    Ok(())
}
