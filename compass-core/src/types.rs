//! Shared types and error enum for compass-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by compass-core and surfaced by its callers.
#[derive(Debug, Error)]
pub enum CompassError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("no matching POI within search radius")]
    NoResults,
    #[error("cache corrupt: {0}")]
    CacheCorrupt(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompassError>;

// ---------------------------------------------------------------------------
// Coordinates and fixes
// ---------------------------------------------------------------------------

/// A point on the Earth in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5},{:.5}", self.lat, self.lon)
    }
}

/// A single reading from the position source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub coord: Coordinate,
    pub accuracy_m: Option<f64>,
    pub timestamp_ms: u64,
}

impl PositionFix {
    pub fn new(lat: f64, lon: f64, timestamp_ms: u64) -> Self {
        PositionFix {
            coord: Coordinate::new(lat, lon),
            accuracy_m: None,
            timestamp_ms,
        }
    }
}

/// Failure signal from the position source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionError {
    PermissionDenied,
    Unavailable {
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<PositionError> for CompassError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::PermissionDenied => CompassError::PermissionDenied,
            PositionError::Unavailable { message } => {
                CompassError::PositionUnavailable(message.unwrap_or_else(|| "unknown".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Points of interest
// ---------------------------------------------------------------------------

/// A resolved point of interest. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    /// Element identity, e.g. `node/123456`.
    pub id: String,
    pub name: String,
    pub location: Coordinate,
    /// City, town, village or hamlet. Empty when untagged.
    pub locality: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_error_conversion() {
        let err: CompassError = PositionError::PermissionDenied.into();
        assert!(matches!(err, CompassError::PermissionDenied));

        let err: CompassError = PositionError::Unavailable {
            message: Some("timeout".into()),
        }
        .into();
        assert_eq!(err.to_string(), "position unavailable: timeout");
    }

    #[test]
    fn test_position_error_json() {
        let err: PositionError =
            serde_json::from_str(r#"{"kind":"permission_denied"}"#).unwrap();
        assert_eq!(err, PositionError::PermissionDenied);

        let err: PositionError = serde_json::from_str(r#"{"kind":"unavailable"}"#).unwrap();
        assert_eq!(err, PositionError::Unavailable { message: None });
    }

    #[test]
    fn test_io_error_conversion() {
        fn read_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/poi-compass/config.yaml")?)
        }
        assert!(matches!(read_missing(), Err(CompassError::Io(_))));
    }

    #[test]
    fn test_coordinate_display() {
        assert_eq!(Coordinate::new(40.0, -75.0).to_string(), "40.00000,-75.00000");
    }
}
