mod history;
mod resolve;
mod sources;

use std::path::Path;

use serde_json::Value;
use skysignal_core::{resolve_skysignal_home, CascadeResolver, ResolverConfig, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// JSON document to print plus the signals that ended without a reading.
pub struct CommandOutput {
    pub data: Value,
    pub absent: Vec<SignalKind>,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            absent: Vec::new(),
        }
    }
}

pub async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<CommandOutput, CliError> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Resolve(args) => resolve::run(args, config, cancel).await,
        Command::History(args) => history::run(args, config),
        Command::Sources(args) => sources::run(args, config),
    }
}

/// Explicit `--config`, else `$SKYSIGNAL_HOME/config.toml` when it exists,
/// else the built-in cascades.
fn load_config(path: Option<&Path>) -> Result<ResolverConfig, CliError> {
    if let Some(path) = path {
        debug!(path = %path.display(), "loading configuration");
        return Ok(ResolverConfig::load(path)?);
    }

    let implicit = resolve_skysignal_home().join("config.toml");
    if implicit.is_file() {
        debug!(path = %implicit.display(), "loading configuration");
        return Ok(ResolverConfig::load(&implicit)?);
    }
    Ok(ResolverConfig::default())
}

fn build_resolver(config: ResolverConfig, with_sources: bool) -> Result<CascadeResolver, CliError> {
    let builder = CascadeResolver::builder().with_config(config);
    let builder = if with_sources {
        builder.with_default_sources()
    } else {
        builder
    };
    Ok(builder.build()?)
}

fn parse_kind(raw: &str) -> Result<SignalKind, CliError> {
    Ok(raw.parse::<SignalKind>()?)
}
