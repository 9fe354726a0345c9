//! POI locator: cache first, then an Overpass search.
//!
//! The search backend sits behind the `PoiSearch` trait so the locator and
//! runtime can be exercised without network access.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use compass_core::config::SearchConfig;
use compass_core::overpass::{build_query, nearest_poi, OverpassResponse};
use compass_core::{CompassError, Coordinate, Poi};

use crate::cache::PoiCache;

/// Nearest-POI search against an external geospatial service.
#[async_trait]
pub trait PoiSearch: Send + Sync {
    async fn nearest(&self, observer: Coordinate) -> Result<Poi, CompassError>;
}

// ---------------------------------------------------------------------------
// Overpass HTTP client
// ---------------------------------------------------------------------------

/// Overpass interpreter client.
#[derive(Clone)]
pub struct OverpassClient {
    endpoint: String,
    name: String,
    radius_m: u32,
    client: reqwest::Client,
}

impl OverpassClient {
    pub fn new(config: &SearchConfig) -> Result<Self, CompassError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .user_agent(concat!("poi-compass/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CompassError::Network(e.to_string()))?;
        Ok(OverpassClient {
            endpoint: config.endpoint.clone(),
            name: config.name.clone(),
            radius_m: config.radius_m,
            client,
        })
    }
}

#[async_trait]
impl PoiSearch for OverpassClient {
    async fn nearest(&self, observer: Coordinate) -> Result<Poi, CompassError> {
        let query = build_query(observer, &self.name, self.radius_m);
        tracing::debug!(%observer, radius_m = self.radius_m, "overpass query");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("data", query.as_str())])
            .send()
            .await
            .map_err(|e| CompassError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompassError::Network(format!("HTTP {status}")));
        }

        let body: OverpassResponse = response
            .json()
            .await
            .map_err(|e| CompassError::Network(format!("bad response body: {e}")))?;

        tracing::debug!(elements = body.elements.len(), "overpass response");
        nearest_poi(observer, &body, &self.name).ok_or(CompassError::NoResults)
    }
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Resolves the nearest POI, consulting the cache before the search.
pub struct Locator {
    search: Box<dyn PoiSearch>,
    cache: Mutex<PoiCache>,
}

impl Locator {
    pub fn new(search: Box<dyn PoiSearch>, cache: PoiCache) -> Self {
        Locator {
            search,
            cache: Mutex::new(cache),
        }
    }

    /// Cached POI if fresh, otherwise search and cache the result.
    pub async fn locate(&self, observer: Coordinate, now_ms: u64) -> Result<Poi, CompassError> {
        if let Some(poi) = self.cached(now_ms) {
            tracing::debug!(poi = %poi.id, "cache hit");
            return Ok(poi);
        }

        let poi = self.search.nearest(observer).await?;

        match self.cache.lock() {
            Ok(mut cache) => {
                if let Err(e) = cache.put(&poi, now_ms) {
                    tracing::warn!(error = %e, "failed to persist POI cache");
                }
            }
            Err(_) => tracing::warn!("POI cache lock poisoned, result not cached"),
        }
        Ok(poi)
    }

    fn cached(&self, now_ms: u64) -> Option<Poi> {
        self.cache.lock().ok()?.get(now_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::cache::DEFAULT_TTL_MS;

    /// Canned search backend that counts calls.
    pub(crate) struct FakeSearch {
        pub result: Result<Poi, &'static str>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeSearch {
        pub(crate) fn found(poi: Poi) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                FakeSearch {
                    result: Ok(poi),
                    calls: calls.clone(),
                },
                calls,
            )
        }

        pub(crate) fn failing(kind: &'static str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                FakeSearch {
                    result: Err(kind),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl PoiSearch for FakeSearch {
        async fn nearest(&self, _observer: Coordinate) -> Result<Poi, CompassError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(ref poi) => Ok(poi.clone()),
                Err("no_results") => Err(CompassError::NoResults),
                Err(msg) => Err(CompassError::Network(msg.to_string())),
            }
        }
    }

    pub(crate) fn sample_poi() -> Poi {
        Poi {
            id: "node/1".into(),
            name: "McDonald's".into(),
            location: Coordinate::new(40.001, -75.0),
            locality: "Philadelphia".into(),
        }
    }

    const OBSERVER: Coordinate = Coordinate::new(40.0, -75.0);

    #[tokio::test]
    async fn test_miss_searches_and_caches() {
        let (search, calls) = FakeSearch::found(sample_poi());
        let locator = Locator::new(
            Box::new(search),
            PoiCache::open_memory(DEFAULT_TTL_MS).unwrap(),
        );

        let poi = locator.locate(OBSERVER, 1_000).await.unwrap();
        assert_eq!(poi, sample_poi());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second call within TTL is served from cache
        let poi = locator.locate(OBSERVER, 2_000).await.unwrap();
        assert_eq!(poi, sample_poi());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // After TTL the search runs again
        locator.locate(OBSERVER, 1_000 + 301_000).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_search() {
        let (search, calls) = FakeSearch::failing("unreachable");
        let mut cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        cache.put(&sample_poi(), 1_000).unwrap();
        let locator = Locator::new(Box::new(search), cache);

        assert_eq!(locator.locate(OBSERVER, 2_000).await.unwrap(), sample_poi());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_propagate_and_are_not_cached() {
        let (search, calls) = FakeSearch::failing("no_results");
        let locator = Locator::new(
            Box::new(search),
            PoiCache::open_memory(DEFAULT_TTL_MS).unwrap(),
        );
        assert!(matches!(
            locator.locate(OBSERVER, 1_000).await,
            Err(CompassError::NoResults)
        ));

        let (search, _) = FakeSearch::failing("connection refused");
        let locator = Locator::new(
            Box::new(search),
            PoiCache::open_memory(DEFAULT_TTL_MS).unwrap(),
        );
        assert!(matches!(
            locator.locate(OBSERVER, 1_000).await,
            Err(CompassError::Network(_))
        ));
        assert!(locator.cached(1_000).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // OverpassClient against a local interpreter
    // -----------------------------------------------------------------------

    /// Serve `body` with `status` on a local port, but only for requests
    /// that carry an Overpass query in the `data` parameter.
    async fn fake_interpreter(status: u16, body: &'static str) -> String {
        use std::collections::HashMap;

        use axum::extract::Query;
        use axum::http::StatusCode;

        let status = StatusCode::from_u16(status).unwrap();
        let app = axum::Router::new().route(
            "/api/interpreter",
            axum::routing::get(move |Query(params): Query<HashMap<String, String>>| async move {
                match params.get("data") {
                    Some(q) if q.starts_with("[out:json]") && q.contains("McDonald's") => {
                        (status, body)
                    }
                    _ => (StatusCode::BAD_REQUEST, "missing data parameter"),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/interpreter")
    }

    fn client_for(endpoint: String) -> OverpassClient {
        OverpassClient::new(&SearchConfig {
            endpoint,
            ..SearchConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_overpass_nearest_node() {
        let endpoint = fake_interpreter(
            200,
            r#"{"elements": [
                {"type": "node", "id": 7, "lat": 40.002, "lon": -75.0,
                 "tags": {"name": "McDonald's", "addr:city": "Philadelphia"}},
                {"type": "node", "id": 8, "lat": 40.001, "lon": -75.0,
                 "tags": {"name": "McDonald's", "addr:town": "Camden"}}
            ]}"#,
        )
        .await;

        let poi = client_for(endpoint).nearest(OBSERVER).await.unwrap();
        assert_eq!(poi.id, "node/8");
        assert_eq!(poi.locality, "Camden");
    }

    #[tokio::test]
    async fn test_overpass_server_error_is_network() {
        let endpoint = fake_interpreter(500, "rate limited").await;
        match client_for(endpoint).nearest(OBSERVER).await {
            Err(CompassError::Network(msg)) => assert!(msg.contains("500"), "got {msg}"),
            other => panic!("Expected Network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overpass_garbage_body_is_network() {
        let endpoint = fake_interpreter(200, "garbage").await;
        assert!(matches!(
            client_for(endpoint).nearest(OBSERVER).await,
            Err(CompassError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_overpass_empty_is_no_results() {
        let endpoint = fake_interpreter(200, r#"{"elements": []}"#).await;
        assert!(matches!(
            client_for(endpoint).nearest(OBSERVER).await,
            Err(CompassError::NoResults)
        ));
    }

    #[tokio::test]
    async fn test_overpass_unreachable_is_network() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client_for(format!("http://{addr}/api/interpreter"));
        assert!(matches!(
            client.nearest(OBSERVER).await,
            Err(CompassError::Network(_))
        ));
    }

    #[test]
    fn test_overpass_client_from_config() {
        let client = OverpassClient::new(&SearchConfig::default()).unwrap();
        assert_eq!(client.endpoint, "https://overpass-api.de/api/interpreter");
        assert_eq!(client.radius_m, 50_000);
        assert_eq!(client.name, "McDonald's");
    }
}
