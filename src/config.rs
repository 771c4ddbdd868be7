//! Configuration module

use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server-push alert stream endpoint
    pub stream_url: String,

    /// Recent-alerts listing endpoint for the startup preload
    pub alerts_url: String,

    /// Geocoding service base URL
    pub geo_api_url: String,

    /// Snapshot API port
    pub port: u16,

    /// Delay between reconnect attempts, seconds
    pub reconnect_delay_secs: u64,

    /// How many recent alerts to replay at startup (clamped 50-100)
    pub preload_limit: usize,

    /// Override for the geolocation cache file location
    pub geo_cache_file: Option<PathBuf>,

    /// Capacity of the stream-to-ingest channel
    pub channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            stream_url: env::var("STREAM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000/stream".to_string()),

            alerts_url: env::var("ALERTS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000/alerts".to_string()),

            geo_api_url: env::var("GEO_API_URL")
                .unwrap_or_else(|_| "https://ipapi.co".to_string()),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8090),

            reconnect_delay_secs: env::var("RECONNECT_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),

            preload_limit: env::var("PRELOAD_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100)
                .clamp(50, 100),

            geo_cache_file: env::var("GEO_CACHE_FILE").ok().map(PathBuf::from),

            channel_capacity: env::var("CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(256)
                // tokio::mpsc panics on a zero-capacity channel.
                .max(1),
        }
    }
}
