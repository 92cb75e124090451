mod cli;
mod commands;
mod error;
mod logging;

use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(error) = logging::init_logging() {
        eprintln!("warning: {error}");
    }

    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing with cached data");
            on_interrupt.cancel();
        }
    });

    let output = commands::run(&cli, &cancel).await?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output.data)?
    } else {
        serde_json::to_string(&output.data)?
    };
    println!("{rendered}");

    if cli.strict && !output.absent.is_empty() {
        return Err(CliError::Absent {
            kinds: output
                .absent
                .iter()
                .map(|kind| kind.as_str().to_owned())
                .collect(),
        });
    }

    Ok(ExitCode::SUCCESS)
}
