//! Alert Ingestion Pipeline
//!
//! Turns one inbound alert into geolocation lookups, arc/marker
//! insertions and counter updates. The only writer of the retention
//! store and the dashboard stats; never touches the network or disk
//! directly - that is the resolver's job.

use super::alert::Alert;
use super::geo::{GeoLocation, GeoResolver, FALLBACK_LAT, FALLBACK_LNG};
use super::store::{Marker, RenderableArc, RetentionStore};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed destination anchor every arc points at.
pub const ANCHOR_LAT: f64 = FALLBACK_LAT;
pub const ANCHOR_LNG: f64 = FALLBACK_LNG;

/// Upper bound on arc weight so high-count sources do not dominate
/// the render.
const MAX_ARC_WEIGHT: f64 = 12.0;

pub type SharedStore = Arc<RwLock<RetentionStore>>;
pub type SharedStats = Arc<RwLock<DashboardStats>>;

/// Aggregate counters exposed to the dashboard.
#[derive(Debug, Default)]
pub struct DashboardStats {
    /// Monotonic alert count; bumped once per alert regardless of how
    /// its sources resolve.
    pub total_alerts: u64,
    /// Per-country occurrence tally over resolved sources.
    pub country_counts: HashMap<String, u64>,
    /// Human-readable summary of the most recent alert's primary
    /// source.
    pub last_source: Option<LastSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastSource {
    pub city: String,
    pub country: String,
    pub category: String,
    pub detected_at: String,
}

pub struct IngestPipeline {
    resolver: Arc<GeoResolver>,
    store: SharedStore,
    stats: SharedStats,
}

impl IngestPipeline {
    pub fn new(resolver: Arc<GeoResolver>, store: SharedStore, stats: SharedStats) -> Self {
        Self {
            resolver,
            store,
            stats,
        }
    }

    /// Process one alert end to end.
    ///
    /// Every IP in `top_srcs` is resolved in document order; the first
    /// resolvable one becomes the primary location, which gets the
    /// alert's single marker and the last-source summary. Sources that
    /// fail to resolve are skipped silently.
    pub async fn ingest(&self, alert: Alert) {
        self.stats.write().total_alerts += 1;

        let category = alert.category();
        let color = category.color();
        let mut primary: Option<GeoLocation> = None;

        for (ip, count) in &alert.top_srcs {
            let Some(geo) = self.resolver.resolve(ip).await else {
                continue;
            };

            if let Some(country) = &geo.country {
                *self
                    .stats
                    .write()
                    .country_counts
                    .entry(country.clone())
                    .or_insert(0) += 1;
            }

            let weight = ((*count as f64) + 1.0).ln().min(MAX_ARC_WEIGHT);
            self.store.write().add_arc(RenderableArc {
                start_lat: geo.lat,
                start_lng: geo.lng,
                end_lat: ANCHOR_LAT,
                end_lng: ANCHOR_LNG,
                color: color.to_string(),
                weight,
                category,
            });

            if primary.is_none() {
                primary = Some(geo);
            }
        }

        if let Some(geo) = primary {
            let now = Utc::now();
            self.store.write().add_marker(Marker::new(&geo, color, now));

            self.stats.write().last_source = Some(LastSource {
                city: geo.city.unwrap_or_else(|| "Unknown".to_string()),
                country: geo.country.unwrap_or_else(|| "Unknown".to_string()),
                category: category.to_string(),
                detected_at: alert.detected_at.unwrap_or_else(|| now.to_rfc3339()),
            });
        }
    }
}
