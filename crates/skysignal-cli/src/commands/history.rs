use std::time::Duration;

use skysignal_core::ResolverConfig;

use crate::cli::HistoryArgs;
use crate::error::CliError;

use super::{build_resolver, parse_kind, CommandOutput};

pub fn run(args: &HistoryArgs, config: ResolverConfig) -> Result<CommandOutput, CliError> {
    let kind = parse_kind(&args.kind)?;
    let location = args.location.point()?;
    if !args.window_hours.is_finite() || args.window_hours <= 0.0 {
        return Err(CliError::Command(format!(
            "--window-hours must be positive, got {}",
            args.window_hours
        )));
    }
    let window = Duration::from_secs_f64(args.window_hours * 3_600.0);

    let resolver = build_resolver(config, false)?;
    let report = resolver.history_report(kind, window, location)?;
    Ok(CommandOutput::ok(serde_json::to_value(report)?))
}
