//! `usegate` entry point.
//!
//! Exit status is 0 on success and 1 on any failure, including `validate`
//! of an identifier that is not allowed.

use clap::Parser;

use usegate::cli::Cli;
use usegate::commands;
use usegate::error::CliError;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = std::io::stdout();
    let stdin = std::io::stdin();
    let result = commands::run(cli, &mut stdout.lock(), &mut stdin.lock());

    let code = match result {
        Ok(()) => 0,
        // The verdict is already on stdout.
        Err(CliError::Denied { .. }) => 1,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("usegate: {e}");
            1
        }
    };

    std::process::exit(code);
}

/// Initialise tracing subscriber with stderr output.
///
/// When `verbose` is true, sets filter to `debug`. Otherwise, respects
/// `RUST_LOG` environment variable (defaulting to no output).
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
