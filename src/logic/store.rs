//! Deduplication & Retention Store
//!
//! Owns the current renderable set: arcs from a source location to the
//! destination anchor, and short-lived pulsing markers. Enforces
//! per-category uniqueness of arcs, sliding-window capacity bounds and
//! marker decay, so an unbounded bursty alert stream always renders as
//! a small stable set.

use super::alert::Category;
use super::geo::GeoLocation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Arc capacity; past this the oldest arcs are dropped first.
pub const MAX_ARCS: usize = 300;
/// Marker capacity.
pub const MAX_MARKERS: usize = 40;
/// Marker lifetime in seconds.
pub const MARKER_TTL_SECS: f64 = 6.0;

const MARKER_INITIAL_ALTITUDE: f64 = 0.02;

/// A rendered connection from a source location to the fixed anchor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderableArc {
    pub start_lat: f64,
    pub start_lng: f64,
    pub end_lat: f64,
    pub end_lng: f64,
    pub color: String,
    pub weight: f64,
    pub category: Category,
}

/// A transient pulse at a source location. Self-expires after
/// [`MARKER_TTL_SECS`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub lat: f64,
    pub lng: f64,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub altitude: f64,
}

impl Marker {
    pub fn new(loc: &GeoLocation, color: &str, now: DateTime<Utc>) -> Self {
        Self {
            lat: loc.lat,
            lng: loc.lng,
            color: color.to_string(),
            created_at: now,
            altitude: MARKER_INITIAL_ALTITUDE,
        }
    }
}

/// Dedup key: coordinates rounded to 2 decimal places plus category.
/// Uniqueness is per category, so one location may show both an attack
/// and a normal arc at the same time.
type ArcKey = (i64, i64, Category);

fn arc_key(arc: &RenderableArc) -> ArcKey {
    (
        (arc.start_lat * 100.0).round() as i64,
        (arc.start_lng * 100.0).round() as i64,
        arc.category,
    )
}

/// The retention store. All mutation funnels through the single ingest
/// task; readers take snapshots.
pub struct RetentionStore {
    arcs: VecDeque<RenderableArc>,
    arc_keys: HashSet<ArcKey>,
    markers: VecDeque<Marker>,
    show_attack: bool,
    show_normal: bool,
}

impl RetentionStore {
    pub fn new() -> Self {
        Self {
            arcs: VecDeque::new(),
            arc_keys: HashSet::new(),
            markers: VecDeque::new(),
            show_attack: true,
            show_normal: true,
        }
    }

    /// Insert an arc unless its rounded-coordinate key already exists
    /// in its category. Returns whether the arc was inserted.
    ///
    /// After insertion the set is trimmed to the most recent
    /// [`MAX_ARCS`]; evicted arcs release their dedup key so the
    /// location can reappear later.
    pub fn add_arc(&mut self, arc: RenderableArc) -> bool {
        let key = arc_key(&arc);
        if self.arc_keys.contains(&key) {
            return false;
        }

        self.arc_keys.insert(key);
        self.arcs.push_back(arc);

        while self.arcs.len() > MAX_ARCS {
            if let Some(evicted) = self.arcs.pop_front() {
                self.arc_keys.remove(&arc_key(&evicted));
            }
        }

        true
    }

    /// Append a marker, dropping the oldest past [`MAX_MARKERS`].
    pub fn add_marker(&mut self, marker: Marker) {
        self.markers.push_back(marker);
        while self.markers.len() > MAX_MARKERS {
            self.markers.pop_front();
        }
    }

    /// Age out expired markers and recompute the pulse altitude of the
    /// rest. Driven by the periodic tick and by marker reads.
    ///
    /// altitude = |sin(age * 3)| * 0.08 * fade + 0.02 * fade,
    /// fade = 1 - age / TTL. Rises, settles and fully fades by TTL.
    pub fn decay_markers(&mut self, now: DateTime<Utc>) {
        self.markers.retain_mut(|marker| {
            let age = (now - marker.created_at).num_milliseconds() as f64 / 1000.0;
            if age > MARKER_TTL_SECS {
                return false;
            }
            let fade = 1.0 - age / MARKER_TTL_SECS;
            marker.altitude = (age * 3.0).sin().abs() * 0.08 * fade + 0.02 * fade;
            true
        });
    }

    /// Snapshot of every retained arc, in insertion order.
    pub fn arcs(&self) -> Vec<RenderableArc> {
        self.arcs.iter().cloned().collect()
    }

    /// Snapshot filtered by the category visibility toggles. Pure
    /// read-side filter; the stored set and its keys are untouched.
    pub fn visible_arcs(&self) -> Vec<RenderableArc> {
        self.arcs
            .iter()
            .filter(|a| match a.category {
                Category::Attack => self.show_attack,
                Category::Normal => self.show_normal,
            })
            .cloned()
            .collect()
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.markers.iter().cloned().collect()
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    pub fn set_toggles(&mut self, show_attack: Option<bool>, show_normal: Option<bool>) {
        if let Some(v) = show_attack {
            self.show_attack = v;
        }
        if let Some(v) = show_normal {
            self.show_normal = v;
        }
    }

    pub fn toggles(&self) -> (bool, bool) {
        (self.show_attack, self.show_normal)
    }
}

impl Default for RetentionStore {
    fn default() -> Self {
        Self::new()
    }
}
