use skysignal_core::{ResolverConfig, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::cli::ResolveArgs;
use crate::error::CliError;

use super::{build_resolver, parse_kind, CommandOutput};

pub async fn run(
    args: &ResolveArgs,
    config: ResolverConfig,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CliError> {
    let kinds = requested_kinds(&args.kinds)?;
    let location = args.location.point()?;
    let resolver = build_resolver(config, true)?;

    let resolutions = resolver.resolve_all(&kinds, location, cancel).await;
    let absent = resolutions
        .iter()
        .filter(|resolution| resolution.is_absent())
        .map(|resolution| resolution.signal_kind)
        .collect();

    // A single kind prints the resolution itself, several print an array.
    let data = match resolutions.as_slice() {
        [single] => serde_json::to_value(single)?,
        many => serde_json::to_value(many)?,
    };
    Ok(CommandOutput { data, absent })
}

fn requested_kinds(raw: &[String]) -> Result<Vec<SignalKind>, CliError> {
    if raw.iter().any(|kind| kind.eq_ignore_ascii_case("all")) {
        return Ok(SignalKind::ALL.to_vec());
    }

    let mut kinds = Vec::with_capacity(raw.len());
    for name in raw {
        let kind = parse_kind(name)?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}
