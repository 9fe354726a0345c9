//! Navigator runtime: one task owns the engine, everything else sends events.
//!
//! Position fixes, orientation readings, recenter requests and locate
//! completions all arrive on one mpsc channel, so the engine has exactly
//! one mutator. Locate requests run in spawned tasks and report back on
//! the same channel. After every event the latest `Snapshot` is published
//! on a watch channel for the UI side to read.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};

use compass_core::config::NavigationConfig;
use compass_core::engine::LocateRequest;
use compass_core::{
    CompassError, NavigationEngine, OrientationReading, Poi, PositionError, PositionFix, Snapshot,
};

use crate::locator::Locator;

/// Events queue depth before senders wait.
const EVENT_QUEUE: usize = 64;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Inputs to the navigator.
#[derive(Debug)]
pub enum Event {
    FixArrived(PositionFix),
    PositionFailed(PositionError),
    OrientationChanged(OrientationReading),
    LocateCompleted(Result<Poi, CompassError>),
    Recenter,
}

/// Cloneable handle for feeding events and reading the latest snapshot.
#[derive(Clone)]
pub struct NavigatorHandle {
    events: mpsc::Sender<Event>,
    snapshots: watch::Receiver<Snapshot>,
}

impl NavigatorHandle {
    /// Queue an event. Returns `false` if the navigator has stopped.
    pub async fn send(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }
}

/// Owns the engine and dispatches events to it.
pub struct Navigator {
    engine: NavigationEngine,
    locator: Arc<Locator>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    snapshots: watch::Sender<Snapshot>,
}

impl Navigator {
    pub fn new(config: NavigationConfig, locator: Arc<Locator>) -> (Self, NavigatorHandle) {
        let engine = NavigationEngine::new(config);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (snapshots, snapshot_rx) = watch::channel(engine.snapshot());

        let handle = NavigatorHandle {
            events: events_tx.clone(),
            snapshots: snapshot_rx,
        };
        let navigator = Navigator {
            engine,
            locator,
            events_tx,
            events_rx,
            snapshots,
        };
        (navigator, handle)
    }

    /// Start the navigator on the current tokio runtime.
    pub fn spawn(config: NavigationConfig, locator: Arc<Locator>) -> NavigatorHandle {
        let (navigator, handle) = Navigator::new(config, locator);
        tokio::spawn(navigator.run());
        handle
    }

    /// Process events until every handle and snapshot receiver is dropped.
    ///
    /// The navigator keeps its own sender for locate completions, so the
    /// event channel alone never closes.
    pub async fn run(mut self) {
        tracing::info!("navigator started");
        loop {
            let event = tokio::select! {
                event = self.events_rx.recv() => event,
                _ = self.snapshots.closed() => None,
            };
            let Some(event) = event else {
                break;
            };
            self.handle(event);
        }
        tracing::info!(
            fixes = self.engine.fixes,
            locates = self.engine.locates_requested,
            failed = self.engine.locates_failed,
            "navigator stopped"
        );
    }

    fn handle(&mut self, event: Event) {
        let now = now_ms();
        let request = match event {
            Event::FixArrived(fix) => {
                tracing::trace!(lat = fix.coord.lat, lon = fix.coord.lon, "fix");
                self.engine.on_position_fix(fix, now)
            }
            Event::PositionFailed(err) => {
                let status = self.engine.on_position_error(err.clone());
                tracing::warn!(error = %CompassError::from(err), %status, "position source error");
                None
            }
            Event::OrientationChanged(reading) => {
                self.engine.on_orientation(reading);
                None
            }
            Event::LocateCompleted(result) => {
                let succeeded = result.is_ok();
                let status = self.engine.on_locate_completed(result, now);
                if succeeded {
                    tracing::info!(%status, "target updated");
                } else {
                    tracing::warn!(%status, "locate failed, keeping previous target");
                }
                // Triggers are re-evaluated on the next fix or recenter
                None
            }
            Event::Recenter => {
                tracing::info!("recenter requested");
                self.engine.recenter();
                self.engine.reconcile(now)
            }
        };

        if let Some(request) = request {
            self.dispatch(request, now);
        }
        self.snapshots.send_replace(self.engine.snapshot());
    }

    fn dispatch(&self, request: LocateRequest, now: u64) {
        tracing::info!(
            lat = request.observer.lat,
            lon = request.observer.lon,
            reason = %request.reason,
            "locating nearest POI"
        );
        let locator = self.locator.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = locator.locate(request.observer, now).await;
            let _ = tx.send(Event::LocateCompleted(result)).await;
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use compass_core::Phase;

    use crate::cache::{PoiCache, DEFAULT_TTL_MS};
    use crate::locator::tests::{sample_poi, FakeSearch};

    fn locator(search: FakeSearch) -> Arc<Locator> {
        Arc::new(Locator::new(
            Box::new(search),
            PoiCache::open_memory(DEFAULT_TTL_MS).unwrap(),
        ))
    }

    /// Wait until a published snapshot satisfies `pred`.
    async fn wait_for(handle: &NavigatorHandle, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    if pred(&snap) {
                        return snap.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    #[tokio::test]
    async fn test_fix_then_locate_then_needle() {
        let (search, calls) = FakeSearch::found(sample_poi());
        let handle = Navigator::spawn(NavigationConfig::default(), locator(search));
        assert_eq!(handle.snapshot().phase, Phase::NoFix);

        handle
            .send(Event::FixArrived(PositionFix::new(40.0, -75.0, now_ms())))
            .await;
        let snap = wait_for(&handle, |s| s.phase == Phase::Tracking).await;
        assert_eq!(snap.target.unwrap().id, "node/1");
        assert!(snap.needle.is_none());
        assert_eq!(snap.distance_m, Some(111));

        handle
            .send(Event::OrientationChanged(OrientationReading::Compass { heading: 90.0 }))
            .await;
        let snap = wait_for(&handle, |s| s.needle.is_some()).await;
        let needle = snap.needle.unwrap();
        assert!((needle.angle - 270.0).abs() < 1e-6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_far_target_does_not_relocate_without_new_fix() {
        // ~1.1 km north, beyond the 500 m refresh distance
        let mut far = sample_poi();
        far.location = compass_core::Coordinate::new(40.01, -75.0);
        let (search, calls) = FakeSearch::found(far);
        let handle = Navigator::spawn(NavigationConfig::default(), locator(search));
        let mut rx = handle.subscribe();
        rx.borrow_and_update();

        handle
            .send(Event::FixArrived(PositionFix::new(40.0, -75.0, now_ms())))
            .await;

        let mut publishes = 0;
        let _ = tokio::time::timeout(Duration::from_millis(300), async {
            while rx.changed().await.is_ok() {
                publishes += 1;
            }
        })
        .await;

        // One for the fix, one for the completion
        assert!(publishes <= 3, "got {publishes} snapshot publishes");
        assert_eq!(handle.snapshot().phase, Phase::Tracking);
        assert_eq!(handle.snapshot().distance_m, Some(1112));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.snapshot().status, compass_core::Status::TargetAcquired {
            name: "McDonald's".into(),
            locality: "Philadelphia".into(),
        });
    }

    #[tokio::test]
    async fn test_locate_failure_reported_as_status() {
        let (search, _calls) = FakeSearch::failing("no_results");
        let handle = Navigator::spawn(NavigationConfig::default(), locator(search));

        handle
            .send(Event::FixArrived(PositionFix::new(40.0, -75.0, now_ms())))
            .await;
        let snap = wait_for(&handle, |s| s.status == compass_core::Status::NoResults).await;
        assert_eq!(snap.phase, Phase::Acquiring);
        assert!(snap.target.is_none());
    }

    #[tokio::test]
    async fn test_position_error_keeps_running() {
        let (search, _calls) = FakeSearch::found(sample_poi());
        let handle = Navigator::spawn(NavigationConfig::default(), locator(search));

        handle
            .send(Event::PositionFailed(PositionError::PermissionDenied))
            .await;
        wait_for(&handle, |s| s.status == compass_core::Status::PermissionDenied).await;

        handle
            .send(Event::FixArrived(PositionFix::new(40.0, -75.0, now_ms())))
            .await;
        wait_for(&handle, |s| s.phase == Phase::Tracking).await;
    }

    #[tokio::test]
    async fn test_recenter_relocates() {
        let (search, calls) = FakeSearch::found(sample_poi());
        let handle = Navigator::spawn(NavigationConfig::default(), locator(search));

        handle
            .send(Event::FixArrived(PositionFix::new(40.0, -75.0, now_ms())))
            .await;
        wait_for(&handle, |s| s.phase == Phase::Tracking).await;

        handle.send(Event::Recenter).await;
        // Cache is fresh, so the relocate is served without another search
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.snapshot().phase, Phase::Tracking);
    }
}
