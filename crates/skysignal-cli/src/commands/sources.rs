use serde::Serialize;
use skysignal_core::{ChainEntry, ResolverConfig, SignalKind};

use crate::cli::SourcesArgs;
use crate::error::CliError;

use super::{build_resolver, parse_kind, CommandOutput};

#[derive(Debug, Serialize)]
struct SignalSources {
    kind: SignalKind,
    unit: &'static str,
    geo_scoped: bool,
    retention_secs: u64,
    staleness_ceiling_secs: u64,
    providers: Vec<ChainEntry>,
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    history: String,
    signals: Vec<SignalSources>,
}

pub fn run(args: &SourcesArgs, config: ResolverConfig) -> Result<CommandOutput, CliError> {
    let kinds = match &args.kind {
        Some(raw) => vec![parse_kind(raw)?],
        None => SignalKind::ALL.to_vec(),
    };

    let resolver = build_resolver(config, true)?;
    let signals = kinds
        .into_iter()
        .filter_map(|kind| {
            let signal = resolver.config().signal(kind)?;
            Some(SignalSources {
                kind,
                unit: kind.unit(),
                geo_scoped: kind.is_geo_scoped(),
                retention_secs: signal.retention.as_secs(),
                staleness_ceiling_secs: signal.staleness_ceiling.as_secs(),
                providers: resolver.provider_chain(kind),
            })
        })
        .collect();

    let data = SourcesResponseData {
        history: resolver.history().describe(),
        signals,
    };
    Ok(CommandOutput::ok(serde_json::to_value(data)?))
}
