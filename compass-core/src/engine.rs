//! Navigation engine: position fixes in, needle angle and distance out.
//!
//! Pure state machine, no I/O. The caller feeds it position fixes,
//! orientation readings and locate completions, and performs the
//! `LocateRequest`s it hands back (cache lookup, network search). All
//! mutation goes through `&mut self`, so a single owner serializes events.
//!
//! Phases are derived from state rather than stored:
//! `NoFix` → `Acquiring` (fix, no target) → `Tracking` (fix and target).

use serde::Serialize;

use crate::config::NavigationConfig;
use crate::geo::{bearing, distance, normalize_degrees};
use crate::heading::{HeadingResolver, HeadingSource, OrientationReading};
use crate::types::*;

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Why the engine wants the POI re-located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocateReason {
    /// No target resolved yet.
    NoTarget,
    /// Last successful fetch is older than the refresh interval.
    Stale,
    /// Observer has moved too far from the current target.
    Moved,
    /// User asked to recenter.
    Recenter,
}

impl std::fmt::Display for RelocateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelocateReason::NoTarget => write!(f, "no target"),
            RelocateReason::Stale => write!(f, "stale"),
            RelocateReason::Moved => write!(f, "moved"),
            RelocateReason::Recenter => write!(f, "recenter"),
        }
    }
}

/// Command for the caller: locate the nearest POI around `observer`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocateRequest {
    pub observer: Coordinate,
    pub reason: RelocateReason,
}

/// Needle angle relative to the device heading, plus rounded distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NeedleOutput {
    pub angle: f64,
    pub distance_m: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoFix,
    Acquiring,
    Tracking,
}

/// Status line for the UI sink. Failures are recoverable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    WaitingForFix,
    Locating,
    TargetAcquired { name: String, locality: String },
    PermissionDenied,
    PositionUnavailable { message: String },
    NetworkError { message: String },
    NoResults,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::WaitingForFix => write!(f, "Waiting for position..."),
            Status::Locating => write!(f, "Searching nearby..."),
            Status::TargetAcquired { name, locality } if locality.is_empty() => {
                write!(f, "{name}")
            }
            Status::TargetAcquired { name, locality } => write!(f, "{name}, {locality}"),
            Status::PermissionDenied => write!(f, "Location permission denied"),
            Status::PositionUnavailable { message } => write!(f, "Position unavailable: {message}"),
            Status::NetworkError { message } => write!(f, "Network error: {message}"),
            Status::NoResults => write!(f, "Nothing found nearby"),
        }
    }
}

/// Serializable view of the engine for the UI sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub position: Option<Coordinate>,
    pub target: Option<Poi>,
    pub heading: Option<f64>,
    pub heading_source: HeadingSource,
    pub distance_m: Option<u64>,
    pub needle: Option<NeedleOutput>,
    pub status: Status,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Session state owned by the engine.
#[derive(Debug, Clone, Default)]
pub struct NavigationState {
    pub current_fix: Option<PositionFix>,
    pub previous_fix: Option<PositionFix>,
    pub target: Option<Poi>,
    /// Wall-clock ms of the last successful fetch; 0 until one succeeds.
    pub target_fetched_at_ms: u64,
    pub heading: HeadingResolver,
    pub locate_in_flight: bool,
    /// Set by `recenter`, cleared once a request goes out.
    pub force_relocate: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct NavigationEngine {
    pub state: NavigationState,
    pub config: NavigationConfig,
    pub status: Status,

    // Counters
    pub fixes: u64,
    pub locates_requested: u64,
    pub locates_failed: u64,
}

impl NavigationEngine {
    pub fn new(config: NavigationConfig) -> Self {
        let state = NavigationState {
            heading: HeadingResolver::new(config.min_course_displacement_m),
            ..NavigationState::default()
        };
        NavigationEngine {
            state,
            config,
            status: Status::WaitingForFix,
            fixes: 0,
            locates_requested: 0,
            locates_failed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        match (&self.state.current_fix, &self.state.target) {
            (None, _) => Phase::NoFix,
            (Some(_), None) => Phase::Acquiring,
            (Some(_), Some(_)) => Phase::Tracking,
        }
    }

    /// Record a new fix, refresh course-over-ground, then reconcile.
    ///
    /// Fixes older than the current one are dropped so `previous_fix` always
    /// precedes `current_fix`.
    pub fn on_position_fix(&mut self, fix: PositionFix, now_ms: u64) -> Option<LocateRequest> {
        if let Some(current) = &self.state.current_fix {
            if fix.timestamp_ms < current.timestamp_ms {
                return None;
            }
        }
        self.fixes += 1;
        self.state.previous_fix = self.state.current_fix.replace(fix);

        if let Some(prev) = &self.state.previous_fix {
            self.state.heading.update_course(prev.coord, fix.coord);
        }

        if matches!(
            self.status,
            Status::WaitingForFix | Status::PermissionDenied | Status::PositionUnavailable { .. }
        ) {
            self.status = match &self.state.target {
                Some(poi) => acquired(poi),
                None => Status::Locating,
            };
        }

        self.reconcile(now_ms)
    }

    /// Translate a position-source failure into status. State is untouched;
    /// the stream keeps delivering fixes once it recovers.
    pub fn on_position_error(&mut self, err: PositionError) -> Status {
        self.status = match err {
            PositionError::PermissionDenied => Status::PermissionDenied,
            PositionError::Unavailable { message } => Status::PositionUnavailable {
                message: message.unwrap_or_else(|| "unknown".into()),
            },
        };
        self.status.clone()
    }

    pub fn on_orientation(&mut self, reading: OrientationReading) {
        self.state.heading.on_orientation(reading);
    }

    /// Decide whether the target must be re-located.
    ///
    /// Triggers are checked in order and any one suffices: no target, a
    /// pending recenter, fetch older than the refresh interval, target
    /// farther than the refresh distance. Nothing is requested while a
    /// locate is outstanding.
    pub fn reconcile(&mut self, now_ms: u64) -> Option<LocateRequest> {
        let fix = self.state.current_fix?;
        if self.state.locate_in_flight {
            return None;
        }

        let reason = match &self.state.target {
            None => RelocateReason::NoTarget,
            Some(_) if self.state.force_relocate => RelocateReason::Recenter,
            Some(_)
                if now_ms.saturating_sub(self.state.target_fetched_at_ms)
                    > self.config.refresh_interval_ms =>
            {
                RelocateReason::Stale
            }
            Some(poi) if distance(fix.coord, poi.location) > self.config.refresh_distance_m => {
                RelocateReason::Moved
            }
            Some(_) => return None,
        };

        self.state.locate_in_flight = true;
        self.state.force_relocate = false;
        self.locates_requested += 1;
        if self.state.target.is_none() {
            self.status = Status::Locating;
        }
        Some(LocateRequest {
            observer: fix.coord,
            reason,
        })
    }

    /// Apply the outcome of a locate. Success replaces the target; failure
    /// keeps the previous one and is retried on a later reconcile.
    pub fn on_locate_completed(&mut self, result: Result<Poi>, now_ms: u64) -> Status {
        self.state.locate_in_flight = false;
        self.status = match result {
            Ok(poi) => {
                let status = acquired(&poi);
                self.state.target = Some(poi);
                self.state.target_fetched_at_ms = now_ms;
                status
            }
            Err(err) => {
                self.locates_failed += 1;
                match err {
                    CompassError::NoResults => Status::NoResults,
                    other => Status::NetworkError {
                        message: other.to_string(),
                    },
                }
            }
        };
        self.status.clone()
    }

    /// Force the next reconcile to re-locate.
    pub fn recenter(&mut self) {
        self.state.force_relocate = true;
    }

    /// Rounded distance to the target. Needs a fix and a target, not a heading.
    pub fn distance_m(&self) -> Option<u64> {
        let fix = self.state.current_fix.as_ref()?;
        let target = self.state.target.as_ref()?;
        Some(distance(fix.coord, target.location).round() as u64)
    }

    /// Needle angle and distance. Absent until fix, target and heading are known.
    pub fn output(&self) -> Option<NeedleOutput> {
        let fix = self.state.current_fix.as_ref()?;
        let target = self.state.target.as_ref()?;
        let heading = self.state.heading.resolve()?;
        let angle = normalize_degrees(bearing(fix.coord, target.location) - heading + 360.0);
        Some(NeedleOutput {
            angle,
            distance_m: distance(fix.coord, target.location).round() as u64,
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase(),
            position: self.state.current_fix.map(|f| f.coord),
            target: self.state.target.clone(),
            heading: self.state.heading.resolve(),
            heading_source: self.state.heading.source(),
            distance_m: self.distance_m(),
            needle: self.output(),
            status: self.status.clone(),
        }
    }
}

fn acquired(poi: &Poi) -> Status {
    Status::TargetAcquired {
        name: poi.name.clone(),
        locality: poi.locality.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
