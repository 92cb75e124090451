//! # Domain Models
//!
//! Canonical types shared by adapters, the matcher and the resolver.
//!
//! All constructors validate their invariants, so a value of one of these
//! types is always well formed.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SignalKind`] | Kind of measured signal, with unit and geo scope |
//! | [`GeoPoint`] | Validated latitude/longitude pair |
//! | [`Reading`] | Normalized observation returned by a resolution |
//! | [`Provenance`] | Where a reading came from |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! ```rust,ignore
//! use skysignal_core::{GeoPoint, ValidationError};
//!
//! let limassol = GeoPoint::new(34.707, 33.022)?;
//! let invalid = GeoPoint::new(91.0, 0.0);
//! assert!(matches!(invalid, Err(ValidationError::LatitudeOutOfRange { .. })));
//! ```

mod geo;
mod reading;
mod signal;
mod timestamp;

pub use geo::{haversine_km, GeoPoint, EARTH_RADIUS_KM};
pub use reading::{Provenance, Reading};
pub use signal::SignalKind;
pub use timestamp::UtcDateTime;
