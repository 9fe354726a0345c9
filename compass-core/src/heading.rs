//! Device heading fusion.
//!
//! Two inputs feed the resolver: an absolute orientation reading from the
//! device sensor (preferred) and a course-over-ground derived from
//! successive position fixes (fallback). Course is only recomputed when the
//! fixes are far enough apart for GPS noise not to dominate the bearing.

use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::{bearing, distance, normalize_degrees};
use crate::types::Coordinate;

/// Minimum fix-to-fix displacement before course-over-ground is trusted.
pub const MIN_COURSE_DISPLACEMENT_M: f64 = 2.0;

/// A reading from the orientation source.
///
/// Accepted JSON shapes are `{"heading"}`, `{"alpha", "screen_angle"}` and
/// `{}`. Anything else, including nulls and unknown keys, is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawOrientation")]
pub enum OrientationReading {
    /// Heading already referenced to north.
    Compass { heading: f64 },
    /// Raw rotation angle plus the current screen rotation (0/90/180/270).
    Rotation { alpha: f64, screen_angle: f64 },
    /// Sensor silent or access refused.
    Unavailable {},
}

/// Wire form of an orientation reading before shape checks.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOrientation {
    #[serde(default, deserialize_with = "number")]
    heading: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    alpha: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    screen_angle: Option<f64>,
}

/// A field that, when present, must be a number (not null).
fn number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    f64::deserialize(d).map(Some)
}

impl TryFrom<RawOrientation> for OrientationReading {
    type Error = String;

    fn try_from(raw: RawOrientation) -> std::result::Result<Self, Self::Error> {
        match (raw.heading, raw.alpha, raw.screen_angle) {
            (Some(heading), None, None) => Ok(OrientationReading::Compass { heading }),
            (None, Some(alpha), Some(screen_angle)) => Ok(OrientationReading::Rotation {
                alpha,
                screen_angle,
            }),
            (None, None, None) => Ok(OrientationReading::Unavailable {}),
            _ => Err("expected {heading}, {alpha, screen_angle} or {}".into()),
        }
    }
}

impl OrientationReading {
    /// Heading in [0, 360), or `None` for an unavailable sensor.
    pub fn heading(&self) -> Option<f64> {
        match *self {
            OrientationReading::Compass { heading } => Some(normalize_degrees(heading)),
            OrientationReading::Rotation {
                alpha,
                screen_angle,
            } => Some(normalize_degrees(alpha - screen_angle)),
            OrientationReading::Unavailable {} => None,
        }
    }
}

/// Which input the current heading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingSource {
    Sensor,
    Course,
    Unknown,
}

impl std::fmt::Display for HeadingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeadingSource::Sensor => write!(f, "sensor"),
            HeadingSource::Course => write!(f, "course"),
            HeadingSource::Unknown => write!(f, "unknown"),
        }
    }
}

/// Fuses sensor heading and course-over-ground into one device heading.
#[derive(Debug, Clone)]
pub struct HeadingResolver {
    pub sensor_heading: Option<f64>,
    pub course_heading: Option<f64>,
    pub min_course_displacement_m: f64,
}

impl Default for HeadingResolver {
    fn default() -> Self {
        HeadingResolver::new(MIN_COURSE_DISPLACEMENT_M)
    }
}

impl HeadingResolver {
    pub fn new(min_course_displacement_m: f64) -> Self {
        HeadingResolver {
            sensor_heading: None,
            course_heading: None,
            min_course_displacement_m,
        }
    }

    /// Apply an orientation reading. `Unavailable` drops back to course.
    pub fn on_orientation(&mut self, reading: OrientationReading) {
        self.sensor_heading = reading.heading();
    }

    /// Recompute course-over-ground from two consecutive fixes.
    ///
    /// Returns `true` if the course was updated. Displacements at or below
    /// the threshold keep the previous estimate.
    pub fn update_course(&mut self, previous: Coordinate, current: Coordinate) -> bool {
        if distance(previous, current) <= self.min_course_displacement_m {
            return false;
        }
        self.course_heading = Some(bearing(previous, current));
        true
    }

    /// Current device heading: sensor first, then course.
    pub fn resolve(&self) -> Option<f64> {
        self.sensor_heading.or(self.course_heading)
    }

    pub fn source(&self) -> HeadingSource {
        if self.sensor_heading.is_some() {
            HeadingSource::Sensor
        } else if self.course_heading.is_some() {
            HeadingSource::Course
        } else {
            HeadingSource::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
