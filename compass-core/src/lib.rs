//! compass-core: Pure navigation library for the POI compass.
//!
//! No async and no networking. Geodesy, heading fusion, Overpass
//! query/response handling and the navigation state machine. Shared by the
//! `compass` CLI and its ingest server.

pub mod config;
pub mod engine;
pub mod geo;
pub mod heading;
pub mod overpass;
pub mod types;

// Re-export commonly used types at crate root
pub use engine::{LocateRequest, NavigationEngine, NeedleOutput, Phase, Snapshot, Status};
pub use heading::{HeadingResolver, HeadingSource, OrientationReading};
pub use types::*;
