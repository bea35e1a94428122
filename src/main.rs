//! Binary entry point: resolve configuration once, set up logging, and run the
//! requested command (a demonstration calculation when none is given).
use std::process::ExitCode;

use clap::Parser;
use materials_calculator::cli::{self, Cli};
use materials_calculator::{Config, Error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err
                .downcast_ref::<Error>()
                .map(Error::kind)
                .unwrap_or("Error");
            eprintln!("error[{kind}]: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    cli.apply_overrides(&mut config)?;
    tracing::debug!(db = %config.db_path.display(), "configuration resolved");

    let mut out = cli::stdout();
    cli::run(cli.command, &config, &mut out)
}

/// `RUST_LOG` wins when set; otherwise info, or debug with `--verbose`. Logs
/// go to stderr so command output stays clean.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
