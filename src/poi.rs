//! Nearby landmark enrichment.
//!
//! A bare street address is often not enough for someone responding to a
//! complaint, so the composed address carries a short list of recognisable
//! landmarks near the coordinate: the closest named shop, college and temple.
//! The data comes from an Overpass (OpenStreetMap) query. Any failure here
//! simply means no enrichment.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::geo::Coordinate;
use crate::geocode::endpoint_url;

/// Landmark kinds worth mentioning, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoiCategory {
    Shop,
    College,
    Temple,
}

impl PoiCategory {
    pub const ALL: [PoiCategory; 3] = [PoiCategory::Shop, PoiCategory::College, PoiCategory::Temple];

    /// Whether a set of OSM tags (with a non-empty `name`) falls into this category
    pub fn matches(&self, tags: &HashMap<String, String>, name: &str) -> bool {
        let amenity = tags.get("amenity").map(String::as_str);
        match self {
            PoiCategory::Shop => tags.contains_key("shop"),
            PoiCategory::College => matches!(amenity, Some("college" | "university")),
            PoiCategory::Temple => {
                amenity == Some("place_of_worship")
                    && (tags
                        .get("religion")
                        .is_some_and(|r| r.eq_ignore_ascii_case("hindu"))
                        || name.to_lowercase().contains("temple"))
            }
        }
    }
}

/// The nearest named landmark of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPoi {
    pub category: PoiCategory,
    pub name: String,
    pub distance_meters: f64,
}

impl fmt::Display for NearbyPoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}m)",
            self.name,
            self.distance_meters.round().max(1.0) as i64
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementCenter {
    pub lat: f64,
    pub lon: f64,
}

/// One element of an Overpass response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiElement {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Ways and relations carry a center instead of lat/lon
    pub center: Option<ElementCenter>,
    pub tags: HashMap<String, String>,
}

impl PoiElement {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lon, self.center) {
            (Some(lat), Some(lon), _) => Some(Coordinate::new(lat, lon)),
            (_, _, Some(c)) => Some(Coordinate::new(c.lat, c.lon)),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.tags
            .get("name")
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<PoiElement>,
}

/// Spatial search for tagged points
#[async_trait]
pub trait PoiSearch: Send + Sync {
    async fn search(&self, center: Coordinate, radius_meters: f64) -> Result<Vec<PoiElement>>;
}

/// [`PoiSearch`] backed by an Overpass API interpreter
pub struct OverpassClient {
    client: Client,
    endpoint: Url,
}

impl OverpassClient {
    pub fn new(client: Client, base_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: endpoint_url(base_url, "api/interpreter")?,
        })
    }

    /// Overpass QL selecting shops, colleges/universities and places of worship
    pub fn build_query(center: Coordinate, radius_meters: f64) -> String {
        let around = format!(
            "around:{},{},{}",
            radius_meters.round() as i64,
            center.lat,
            center.lng
        );
        let filters = [
            r#"["shop"]"#,
            r#"["amenity"="college"]"#,
            r#"["amenity"="university"]"#,
            r#"["amenity"="place_of_worship"]"#,
        ];

        let mut query = String::from("[out:json][timeout:10];(");
        for filter in filters {
            query.push_str(&format!("node({around}){filter};"));
        }
        query.push_str(");out body;");
        query
    }
}

#[async_trait]
impl PoiSearch for OverpassClient {
    async fn search(&self, center: Coordinate, radius_meters: f64) -> Result<Vec<PoiElement>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("data", &Self::build_query(center, radius_meters));

        let response: OverpassResponse = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach Overpass")?
            .error_for_status()
            .context("Overpass rejected the query")?
            .json()
            .await
            .context("Failed to parse Overpass response")?;

        Ok(response.elements)
    }
}

/// Pick the nearest named element per category, in display order
pub fn select_nearest(origin: Coordinate, elements: &[PoiElement]) -> Vec<NearbyPoi> {
    let mut best: HashMap<PoiCategory, NearbyPoi> = HashMap::new();

    for element in elements {
        let (Some(name), Some(position)) = (element.name(), element.coordinate()) else {
            continue;
        };
        let distance = origin.distance_to(&position);

        for category in PoiCategory::ALL {
            if !category.matches(&element.tags, name) {
                continue;
            }
            let closer = best
                .get(&category)
                .is_none_or(|current| distance < current.distance_meters);
            if closer {
                best.insert(
                    category,
                    NearbyPoi {
                        category,
                        name: name.to_string(),
                        distance_meters: distance,
                    },
                );
            }
        }
    }

    PoiCategory::ALL
        .iter()
        .filter_map(|c| best.remove(c))
        .collect()
}

/// `"<name> (<meters>m), ..."` or an empty string
pub fn render_nearby(pois: &[NearbyPoi]) -> String {
    pois.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Finds landmarks near a coordinate, degrading every failure to "nothing nearby"
#[derive(Clone)]
pub struct NearbyPoiEnricher {
    search: Arc<dyn PoiSearch>,
    radius_meters: f64,
    timeout: Duration,
}

impl NearbyPoiEnricher {
    pub fn new(search: Arc<dyn PoiSearch>, radius_meters: f64, timeout: Duration) -> Self {
        Self {
            search,
            radius_meters,
            timeout,
        }
    }

    pub async fn find(&self, center: Coordinate) -> Vec<NearbyPoi> {
        let elements =
            match tokio::time::timeout(self.timeout, self.search.search(center, self.radius_meters))
                .await
            {
                Ok(Ok(elements)) => elements,
                Ok(Err(e)) => {
                    warn!("Nearby landmark search failed: {e:#}");
                    return Vec::new();
                }
                Err(_) => {
                    warn!(
                        "Nearby landmark search timed out after {}ms",
                        self.timeout.as_millis()
                    );
                    return Vec::new();
                }
            };

        let pois = select_nearest(center, &elements);
        debug!(
            "{} landmark candidates, {} selected near {}",
            elements.len(),
            pois.len(),
            center
        );
        pois
    }

    /// Rendered list for the address suffix; empty when nothing was found
    pub async fn nearby_text(&self, center: Coordinate) -> String {
        render_nearby(&self.find(center).await)
    }
}
