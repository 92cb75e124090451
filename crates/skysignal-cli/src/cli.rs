//! CLI argument definitions for skysignal.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `resolve` | Run one resolution cycle for one or more signals |
//! | `history` | Show stored samples and their trend |
//! | `sources` | Show each signal's provider chain |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$SKYSIGNAL_HOME/config.toml` if present | TOML overrides |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Exit with code 3 when a signal is absent |
//!
//! # Examples
//!
//! ```bash
//! # Radiation near Limassol
//! skysignal resolve radiation --lat 34.68 --lon 33.04 --pretty
//!
//! # Everything for one digest, failing the cron job if anything is missing
//! skysignal resolve all --lat 34.68 --lon 33.04 --strict
//!
//! # Last three days of Schumann readings
//! skysignal history schumann --window-hours 72
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use skysignal_core::{GeoPoint, ValidationError};

/// Resilient multi-source resolver for environmental and astronomical signals.
///
/// Each invocation runs one resolution cycle and prints the result as JSON;
/// scheduling is left to cron or a similar runner.
#[derive(Debug, Parser)]
#[command(name = "skysignal", author, version, about = "Multi-source signal resolver")]
pub struct Cli {
    /// TOML file overriding the built-in cascades.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Fail with exit code 3 when a requested signal has no reading.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve signals through their provider cascades.
    Resolve(ResolveArgs),
    /// Show stored samples of a signal and the trend they imply.
    History(HistoryArgs),
    /// Show provider chains, registration and circuit state.
    Sources(SourcesArgs),
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Signal kinds (radiation, schumann, air_quality, pollen, sea_temperature,
    /// k_index, fx_rate) or `all`.
    #[arg(required = true)]
    pub kinds: Vec<String>,

    #[command(flatten)]
    pub location: LocationArgs,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub kind: String,

    /// How far back to look.
    #[arg(long, default_value_t = 24.0)]
    pub window_hours: f64,

    #[command(flatten)]
    pub location: LocationArgs,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Limit the listing to one signal kind.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct LocationArgs {
    /// Latitude in decimal degrees.
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees.
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,
}

impl LocationArgs {
    pub fn point(self) -> Result<Option<GeoPoint>, ValidationError> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon).map(Some),
            _ => Ok(None),
        }
    }
}
