//! Alert Model
//!
//! Inbound intrusion-detection alerts as emitted by the detector:
//! a classification label, packet/probability context and the map of
//! suspected source IPs with their occurrence counts.

use chrono::{TimeZone, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// One classified alert from the detection backend.
///
/// Immutable once received. Unknown or missing fields degrade to
/// defaults rather than rejecting the whole message; only structurally
/// invalid JSON is discarded upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Detection time, normalized to an RFC3339 string for display.
    #[serde(default, deserialize_with = "de_timestamp")]
    pub detected_at: Option<String>,

    /// 1 = attack, anything else = normal.
    #[serde(default)]
    pub predicted_label: u8,

    /// Packets observed in the detection window.
    #[serde(default)]
    pub pkts: u64,

    /// Classifier confidence.
    #[serde(default)]
    pub probability: f64,

    /// Suspected source IPs with occurrence counts, in document order.
    /// Order matters: the first resolvable IP becomes the alert's
    /// primary location.
    #[serde(
        default,
        deserialize_with = "de_ordered_counts",
        serialize_with = "ser_ordered_counts"
    )]
    pub top_srcs: Vec<(String, u64)>,
}

impl Alert {
    pub fn category(&self) -> Category {
        Category::from_label(self.predicted_label)
    }
}

/// Alert classification, derived from `predicted_label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Attack,
    Normal,
}

impl Category {
    pub fn from_label(label: u8) -> Self {
        if label == 1 {
            Category::Attack
        } else {
            Category::Normal
        }
    }

    /// Render color for arcs and markers of this category.
    pub fn color(&self) -> &'static str {
        match self {
            Category::Attack => "rgba(255,60,60,0.9)",
            Category::Normal => "rgba(60,180,90,0.9)",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Attack => "attack",
            Category::Normal => "normal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either an ISO/RFC3339 string or an epoch-seconds number.
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
            .map(|dt| dt.to_rfc3339()),
        _ => None,
    }))
}

/// Deserializes a JSON object into key/count pairs preserving the
/// document order of the keys. A plain `HashMap` would scramble the
/// order and change which IP becomes the primary location.
fn de_ordered_counts<'de, D>(deserializer: D) -> Result<Vec<(String, u64)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedCounts;

    impl<'de> Visitor<'de> for OrderedCounts {
        type Value = Vec<(String, u64)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of IP address to occurrence count")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, count)) = access.next_entry::<String, u64>()? {
                pairs.push((key, count));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(OrderedCounts)
}

fn ser_ordered_counts<S>(pairs: &[(String, u64)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (ip, count) in pairs {
        map.serialize_entry(ip, count)?;
    }
    map.end()
}
