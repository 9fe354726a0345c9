//! Overpass query construction and response reduction.
//!
//! Pure half of the POI locator: builds the Overpass QL request and picks the
//! nearest usable element out of the JSON response. The HTTP round trip lives
//! in the server crate.

use std::collections::HashMap;

use serde::Deserialize;

use crate::geo::distance;
use crate::types::{Coordinate, Poi};

/// Name predicate used when none is configured.
pub const DEFAULT_POI_NAME: &str = "McDonald's";

/// Search radius used when none is configured.
pub const DEFAULT_RADIUS_M: u32 = 50_000;

/// Server-side query timeout passed in the `[timeout:]` setting.
const QUERY_TIMEOUT_SEC: u32 = 25;

/// Address tags consulted for the locality, most specific settlement last.
const LOCALITY_TAGS: &[&str] = &["addr:city", "addr:town", "addr:village", "addr:hamlet"];

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub center: Option<Center>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

impl Element {
    /// Own coordinates for nodes, reported center for ways and relations.
    pub fn location(&self) -> Option<Coordinate> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => self.center.map(|c| Coordinate::new(c.lat, c.lon)),
        }
    }

    pub fn locality(&self) -> String {
        LOCALITY_TAGS
            .iter()
            .find_map(|tag| self.tags.get(*tag))
            .cloned()
            .unwrap_or_default()
    }

    fn to_poi(&self, location: Coordinate, default_name: &str) -> Poi {
        Poi {
            id: format!("{}/{}", self.kind, self.id),
            name: self
                .tags
                .get("name")
                .cloned()
                .unwrap_or_else(|| default_name.to_string()),
            location,
            locality: self.locality(),
        }
    }
}

// ---------------------------------------------------------------------------
// Query + reduction
// ---------------------------------------------------------------------------

/// Build an Overpass QL query for nodes, ways and relations named `name`
/// within `radius_m` of `observer`, with centers for non-point results.
pub fn build_query(observer: Coordinate, name: &str, radius_m: u32) -> String {
    let filter = format!(
        "[\"name\"=\"{}\"](around:{},{},{})",
        escape(name),
        radius_m,
        observer.lat,
        observer.lon
    );
    format!(
        "[out:json][timeout:{QUERY_TIMEOUT_SEC}];(node{filter};way{filter};relation{filter};);out center;"
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Pick the element closest to `observer`. Elements without a resolvable
/// location are skipped; ties keep the first one encountered.
pub fn nearest_poi(observer: Coordinate, response: &OverpassResponse, default_name: &str) -> Option<Poi> {
    let mut best: Option<(&Element, Coordinate, f64)> = None;
    for element in &response.elements {
        let Some(location) = element.location() else {
            continue;
        };
        let dist = distance(observer, location);
        if best.map_or(true, |(_, _, d)| dist < d) {
            best = Some((element, location, dist));
        }
    }
    best.map(|(element, location, _)| element.to_poi(location, default_name))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
