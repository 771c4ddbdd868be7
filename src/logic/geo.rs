//! IP Geolocation Resolver
//!
//! Maps source IP strings to geographic coordinates via an external
//! geocoding service, memoizing every successful answer in a JSON
//! cache file so lookups survive restarts.
//!
//! - Cache-first: each distinct IP is fetched at most once per cache
//!   lifetime.
//! - Private/loopback addresses short-circuit to a fixed fallback
//!   location without touching the network.
//! - Lookup failures are returned as `None` and never cached, so a
//!   later alert naming the same IP gets a fresh attempt.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const GEO_CACHE_FILE_NAME: &str = "ip_geo_cache.json";
const LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Coordinate used for private/loopback sources and as the arc anchor.
pub const FALLBACK_LAT: f64 = 20.5937;
pub const FALLBACK_LNG: f64 = 78.9629;

/// A resolved geographic location. Created once per distinct IP and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl GeoLocation {
    /// Sentinel location for private/loopback sources.
    pub fn local_fallback() -> Self {
        Self {
            lat: FALLBACK_LAT,
            lng: FALLBACK_LNG,
            city: None,
            country: None,
        }
    }
}

/// Wire format of the geocoding service response.
#[derive(Debug, Deserialize)]
struct GeoApiResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    country_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("lookup returned status {0}")]
    Status(u16),

    #[error("response missing coordinates")]
    MissingCoordinates,
}

/// Cache-backed geolocation resolver.
pub struct GeoResolver {
    http: reqwest::Client,
    api_url: String,
    cache: RwLock<HashMap<String, GeoLocation>>,
    cache_path: PathBuf,
}

impl GeoResolver {
    /// Create a resolver, loading any previously persisted cache.
    /// An unreadable or corrupt cache file degrades to an empty cache.
    pub fn new(api_url: String, cache_path: PathBuf) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        let cache = match load_cache(&cache_path) {
            Ok(entries) => {
                if !entries.is_empty() {
                    log::info!("Loaded {} cached geolocations", entries.len());
                }
                entries
            }
            Err(e) => {
                log::warn!("Failed to load geolocation cache: {} - starting empty", e);
                HashMap::new()
            }
        };

        Self {
            http,
            api_url,
            cache: RwLock::new(cache),
            cache_path,
        }
    }

    /// Default on-disk location for the persisted cache.
    pub fn default_cache_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("globewatch")
            .join(GEO_CACHE_FILE_NAME)
    }

    /// Resolve an IP to a location.
    ///
    /// Returns `None` for empty input and for any lookup failure.
    /// Failures are not cached.
    pub async fn resolve(&self, ip: &str) -> Option<GeoLocation> {
        if ip.is_empty() {
            return None;
        }

        if let Some(hit) = self.cache_get(ip) {
            return Some(hit);
        }

        if is_private_ip(ip) {
            let loc = GeoLocation::local_fallback();
            self.cache_put(ip, loc.clone());
            return Some(loc);
        }

        match self.fetch(ip).await {
            Ok(loc) => {
                self.cache_put(ip, loc.clone());
                Some(loc)
            }
            Err(e) => {
                log::debug!("Geolocation failed for {}: {}", ip, e);
                None
            }
        }
    }

    /// One outbound lookup against the geocoding service.
    async fn fetch(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        let url = format!("{}/{}/json/", self.api_url.trim_end_matches('/'), ip);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GeoError::Status(response.status().as_u16()));
        }

        let body: GeoApiResponse = response.json().await?;
        match (body.latitude, body.longitude) {
            (Some(lat), Some(lng)) => Ok(GeoLocation {
                lat,
                lng,
                city: body.city,
                country: body.country_name,
            }),
            _ => Err(GeoError::MissingCoordinates),
        }
    }

    pub fn cache_get(&self, ip: &str) -> Option<GeoLocation> {
        self.cache.read().get(ip).cloned()
    }

    /// Insert and persist immediately so the cache survives restarts.
    pub fn cache_put(&self, ip: &str, loc: GeoLocation) {
        self.cache.write().insert(ip.to_string(), loc);
        if let Err(e) = self.save() {
            log::warn!("Failed to persist geolocation cache: {}", e);
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&self.cache_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &*self.cache.read())?;
        Ok(())
    }
}

fn load_cache(path: &PathBuf) -> Result<HashMap<String, GeoLocation>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// RFC1918 ranges plus loopback and the literal "localhost".
fn is_private_ip(ip: &str) -> bool {
    if ip == "localhost" {
        return true;
    }
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) => addr.is_private() || addr.is_loopback(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Unroutable endpoint: any test hitting the network through this
    // URL fails fast instead of succeeding silently.
    const DEAD_API: &str = "http://127.0.0.1:1";

    fn resolver_with_temp_cache(api_url: &str) -> (GeoResolver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = GeoResolver::new(api_url.to_string(), dir.path().join("cache.json"));
        (resolver, dir)
    }

    #[test]
    fn test_private_ip_detection() {
        assert!(is_private_ip("10.0.0.1"));
        assert!(is_private_ip("192.168.1.5"));
        assert!(is_private_ip("172.16.0.1"));
        assert!(is_private_ip("172.31.255.255"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(is_private_ip("localhost"));

        assert!(!is_private_ip("172.32.0.1"));
        assert!(!is_private_ip("8.8.8.8"));
        assert!(!is_private_ip("not-an-ip"));
    }

    #[tokio::test]
    async fn test_empty_ip_is_absent() {
        let (resolver, _dir) = resolver_with_temp_cache(DEAD_API);
        assert!(resolver.resolve("").await.is_none());
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_private_ip_shortcut_without_network() {
        let (resolver, _dir) = resolver_with_temp_cache(DEAD_API);

        let loc = resolver.resolve("192.168.1.5").await.unwrap();
        assert_eq!(loc.lat, FALLBACK_LAT);
        assert_eq!(loc.lng, FALLBACK_LNG);

        // Cached under that IP so the range check need not repeat.
        assert!(resolver.cache_get("192.168.1.5").is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let (resolver, _dir) = resolver_with_temp_cache(DEAD_API);
        resolver.cache_put(
            "203.0.113.9",
            GeoLocation {
                lat: 51.5,
                lng: -0.12,
                city: Some("London".into()),
                country: Some("United Kingdom".into()),
            },
        );

        let loc = resolver.resolve("203.0.113.9").await.unwrap();
        assert_eq!(loc.lat, 51.5);
        assert_eq!(loc.country.as_deref(), Some("United Kingdom"));
    }

    #[tokio::test]
    async fn test_lookup_failure_not_cached() {
        let (resolver, _dir) = resolver_with_temp_cache(DEAD_API);
        assert!(resolver.resolve("203.0.113.50").await.is_none());
        assert!(resolver.cache_get("203.0.113.50").is_none());
    }

    #[tokio::test]
    async fn test_cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let first = GeoResolver::new(DEAD_API.to_string(), path.clone());
        first.cache_put(
            "198.51.100.1",
            GeoLocation {
                lat: 35.6,
                lng: 139.7,
                city: Some("Tokyo".into()),
                country: Some("Japan".into()),
            },
        );
        drop(first);

        let second = GeoResolver::new(DEAD_API.to_string(), path);
        let loc = second.cache_get("198.51.100.1").unwrap();
        assert_eq!(loc.country.as_deref(), Some("Japan"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{{ not json").unwrap();

        let resolver = GeoResolver::new(DEAD_API.to_string(), path);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_resolves_once_then_serves_from_cache() {
        use axum::{extract::Path, routing::get, Json, Router};

        static HITS: AtomicUsize = AtomicUsize::new(0);

        let app = Router::new().route(
            "/:ip/json/",
            get(|Path(_ip): Path<String>| async {
                HITS.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({
                    "latitude": 48.85,
                    "longitude": 2.35,
                    "city": "Paris",
                    "country_name": "France"
                }))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (resolver, _dir) = resolver_with_temp_cache(&format!("http://{}", addr));

        let first = resolver.resolve("93.184.216.34").await.unwrap();
        let second = resolver.resolve("93.184.216.34").await.unwrap();

        assert_eq!(first.lat, second.lat);
        assert_eq!(first.country.as_deref(), Some("France"));
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_coordinates_is_absent() {
        use axum::{extract::Path, routing::get, Json, Router};

        let app = Router::new().route(
            "/:ip/json/",
            get(|Path(_ip): Path<String>| async {
                // Reserved-range style answer: no coordinates.
                Json(serde_json::json!({"error": true, "reason": "Reserved IP Address"}))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (resolver, _dir) = resolver_with_temp_cache(&format!("http://{}", addr));
        assert!(resolver.resolve("203.0.113.77").await.is_none());
        assert!(resolver.cache_get("203.0.113.77").is_none());
    }
}
