//! Geocoding proxy with an in-memory cache and fallbacks for well-known
//! places around the campus.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use convene_types::api::GeocodeQuery;
use convene_types::models::GeocodeResult;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_DELAY: Duration = Duration::from_secs(1);
const USER_AGENT: &str = "convene-backend/0.1";
/// Distinct queries kept before the oldest answers are dropped.
const MAX_CACHED_QUERIES: usize = 512;

/// `(needle, display_name, lat, lon)`; matched as a substring of the
/// lowercased query.
const LANDMARKS: &[(&str, &str, f64, f64)] = &[
    (
        "cité internationale",
        "Cité Internationale Universitaire de Paris, 17 Boulevard Jourdan, 75014 Paris",
        48.8199,
        2.3380,
    ),
    (
        "ciup",
        "Cité Internationale Universitaire de Paris, 17 Boulevard Jourdan, 75014 Paris",
        48.8199,
        2.3380,
    ),
    (
        "maison internationale",
        "Maison Internationale, 17 Boulevard Jourdan, 75014 Paris",
        48.8196,
        2.3384,
    ),
    (
        "parc montsouris",
        "Parc Montsouris, 2 Rue Gazan, 75014 Paris",
        48.8222,
        2.3382,
    ),
    (
        "gare de cité universitaire",
        "Gare de Cité Universitaire, Boulevard Jourdan, 75014 Paris",
        48.8206,
        2.3394,
    ),
];

#[derive(Debug, Deserialize)]
struct Place {
    display_name: String,
    lat: serde_json::Value,
    lon: serde_json::Value,
}

impl Place {
    fn into_result(self) -> Option<GeocodeResult> {
        Some(GeocodeResult {
            lat: coordinate(&self.lat)?,
            lon: coordinate(&self.lon)?,
            display_name: self.display_name,
        })
    }
}

/// Upstream returns coordinates as strings; accept plain numbers too.
fn coordinate(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

pub struct Geocoder {
    client: Client,
    base_url: String,
    delay: Duration,
    cache: Mutex<QueryCache>,
}

/// Upstream answers keyed by normalized query, evicted oldest first.
struct QueryCache {
    entries: HashMap<String, Vec<GeocodeResult>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl QueryCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<&Vec<GeocodeResult>> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, results: Vec<GeocodeResult>) {
        if self.entries.insert(key.clone(), results).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Geocoder {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_delay(base_url, REQUEST_DELAY)
    }

    pub fn with_delay(base_url: impl Into<String>, delay: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            delay,
            cache: Mutex::new(QueryCache::new(MAX_CACHED_QUERIES)),
        })
    }

    /// Cache, then landmark fallbacks, then upstream. Upstream failures
    /// degrade to an empty list.
    pub async fn search(&self, query: &str) -> ApiResult<Vec<GeocodeResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::invalid("Query is required"));
        }
        let key = query.to_lowercase();

        if let Some(hit) = self.cached(&key) {
            debug!("geocode cache hit for '{}'", key);
            return Ok(hit);
        }
        if let Some(landmark) = landmark(&key) {
            return Ok(vec![landmark]);
        }

        match self.fetch(query).await {
            Ok(results) => {
                self.remember(key, results.clone());
                Ok(results)
            }
            Err(e) => {
                warn!("Geocoding '{}' failed: {}", query, e);
                Ok(Vec::new())
            }
        }
    }

    async fn fetch(&self, query: &str) -> Result<Vec<GeocodeResult>, reqwest::Error> {
        tokio::time::sleep(self.delay).await;

        let places: Vec<Place> = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("format", "json"), ("limit", "5"), ("q", query)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(places.into_iter().filter_map(Place::into_result).collect())
    }

    fn cached(&self, key: &str) -> Option<Vec<GeocodeResult>> {
        match self.cache.lock() {
            Ok(cache) => cache.get(key).cloned(),
            Err(e) => {
                warn!("geocode cache lock poisoned: {}", e);
                None
            }
        }
    }

    fn remember(&self, key: String, results: Vec<GeocodeResult>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, results);
        }
    }
}

fn landmark(key: &str) -> Option<GeocodeResult> {
    LANDMARKS
        .iter()
        .find(|(needle, ..)| key.contains(needle))
        .map(|(_, name, lat, lon)| GeocodeResult {
            display_name: (*name).to_string(),
            lat: *lat,
            lon: *lon,
        })
}

pub async fn geocode(
    State(state): State<AppState>,
    Query(query): Query<GeocodeQuery>,
) -> ApiResult<Json<Vec<GeocodeResult>>> {
    let results = state.geocoder.search(&query.q).await?;
    Ok(Json(results))
}
