//! Wire types for the feature-query service and the typed values the
//! pipeline produces from them.
//!
//! Everything under "Wire types" is decoded leniently: a field that is
//! missing, null, or of an unexpected shape decodes as `None` rather than
//! failing the whole response. A feature that is not usable at all decodes
//! as an empty [`RawFeature`]. The normalizer decides what to do with the
//! gaps.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::pipeline::normalize::NormalizeStats;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureQueryResponse {
    #[serde(default, deserialize_with = "lenient_features")]
    pub features: Vec<RawFeature>,
    #[serde(default, rename = "exceededTransferLimit")]
    pub exceeded_transfer_limit: bool,
    /// Query errors come back as HTTP 200 with this object instead of features.
    #[serde(default)]
    pub error: Option<ServiceError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFeature {
    #[serde(default, deserialize_with = "lenient_attributes")]
    pub attributes: GaugeAttributes,
    #[serde(default, deserialize_with = "lenient_geometry")]
    pub geometry: Option<PointGeometry>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GaugeAttributes {
    #[serde(default, rename = "gauge", deserialize_with = "lenient_string")]
    pub station: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub basin: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub water_level: Option<f64>,
    #[serde(default, rename = "rain_fall", deserialize_with = "lenient_f64")]
    pub rainfall: Option<f64>,
    #[serde(default, rename = "alertpull", deserialize_with = "lenient_f64")]
    pub alert_level: Option<f64>,
    #[serde(default, rename = "minorpull", deserialize_with = "lenient_f64")]
    pub minor_level: Option<f64>,
    #[serde(default, rename = "majorpull", deserialize_with = "lenient_f64")]
    pub major_level: Option<f64>,
    #[serde(default, rename = "CreationDate", deserialize_with = "lenient_i64")]
    pub created_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PointGeometry {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
}

fn lenient_features<'de, D>(deserializer: D) -> std::result::Result<Vec<RawFeature>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_attributes<'de, D>(deserializer: D) -> std::result::Result<GaugeAttributes, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(object @ Value::Object(_)) => serde_json::from_value(object).unwrap_or_default(),
        _ => GaugeAttributes::default(),
    })
}

fn lenient_geometry<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<PointGeometry>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(object @ Value::Object(_)) => serde_json::from_value(object).ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_f64(deserializer)?;
    Ok(value.map(|n| n as i64))
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Ordered flood severity. `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTier {
    Normal,
    Alert,
    Minor,
    Major,
}

impl SeverityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityTier::Normal => "normal",
            SeverityTier::Alert => "alert",
            SeverityTier::Minor => "minor",
            SeverityTier::Major => "major",
        }
    }

    pub fn is_alerting(&self) -> bool {
        *self > SeverityTier::Normal
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized station key: lower-cased, whitespace runs collapsed to `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StationId(String);

/// Normalized basin key, derived the same way as [`StationId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BasinId(String);

/// Lower-cases a label and joins its whitespace-separated words with `-`.
///
/// Leading and trailing whitespace disappear with the split, so
/// `" Kelani  River "` becomes `kelani-river`.
pub fn derive_key(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

impl StationId {
    pub fn from_label(label: &str) -> Self {
        Self(derive_key(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl BasinId {
    pub fn from_label(label: &str) -> Self {
        Self(derive_key(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for BasinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Thresholds {
    pub alert: Option<f64>,
    pub minor: Option<f64>,
    pub major: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinates {
    /// False for the (0, 0) placeholder used when geometry is missing.
    pub fn is_placeable(&self) -> bool {
        !(self.longitude == 0.0 && self.latitude == 0.0)
    }
}

/// One validated gauge reading. Only the normalizer constructs these.
#[derive(Debug, Clone, PartialEq)]
pub struct StationReading {
    pub station_id: StationId,
    pub station_name: String,
    pub basin_id: BasinId,
    pub basin_name: String,
    pub level: f64,
    pub rainfall: f64,
    pub thresholds: Thresholds,
    pub timestamp_ms: i64,
    pub coordinates: Coordinates,
}

/// Current state of one station for a single poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub name: String,
    pub basin_id: BasinId,
    pub basin_name: String,
    pub level: f64,
    pub rainfall: f64,
    pub thresholds: Thresholds,
    pub tier: SeverityTier,
    pub last_updated_ms: i64,
    pub coordinates: Coordinates,
}

impl StationSnapshot {
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.last_updated_ms).single()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasinGroup {
    pub id: BasinId,
    pub name: String,
    pub stations: Vec<StationSnapshot>,
}

/// A single point of a station's recent level/rainfall series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp_ms: i64,
    pub level: f64,
    pub rainfall: f64,
}

/// Everything one successful poll produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveData {
    pub snapshots: BTreeMap<StationId, StationSnapshot>,
    pub basins: Vec<BasinGroup>,
    #[serde(skip)]
    pub stats: NormalizeStats,
}
