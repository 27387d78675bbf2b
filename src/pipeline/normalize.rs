use crate::model::{
    BasinId, Coordinates, GaugeAttributes, HistoryPoint, RawFeature, StationId, StationReading,
    Thresholds,
};
use tracing::{debug, warn};

/// Why a raw feature produced no reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    MissingStation,
    MissingBasin,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejected::MissingStation => f.write_str("station label is missing or blank"),
            Rejected::MissingBasin => f.write_str("basin label is missing or blank"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl NormalizeStats {
    pub fn rejection_rate(&self) -> f64 {
        if self.total > 0 {
            self.rejected as f64 / self.total as f64
        } else {
            0.0
        }
    }
}

/// Validates one raw feature into a typed reading.
///
/// Labels are required. Missing level and rainfall default to 0.0, missing
/// geometry to (0, 0), and a missing timestamp to 0. Thresholds stay optional.
pub fn normalize(raw: &RawFeature) -> Result<StationReading, Rejected> {
    let attrs = &raw.attributes;

    let station_name = non_blank(attrs.station.as_deref()).ok_or(Rejected::MissingStation)?;
    let basin_name = non_blank(attrs.basin.as_deref()).ok_or(Rejected::MissingBasin)?;

    let coordinates = raw
        .geometry
        .as_ref()
        .map(|g| Coordinates {
            longitude: g.x.unwrap_or(0.0),
            latitude: g.y.unwrap_or(0.0),
        })
        .unwrap_or_default();

    Ok(StationReading {
        station_id: StationId::from_label(station_name),
        station_name: station_name.to_string(),
        basin_id: BasinId::from_label(basin_name),
        basin_name: basin_name.to_string(),
        level: attrs.water_level.unwrap_or(0.0),
        rainfall: attrs.rainfall.unwrap_or(0.0),
        thresholds: thresholds_of(attrs),
        timestamp_ms: attrs.created_ms.unwrap_or(0),
        coordinates,
    })
}

/// Normalizes a whole batch, dropping and logging rejected features.
pub fn normalize_batch(features: &[RawFeature]) -> (Vec<StationReading>, NormalizeStats) {
    let mut readings = Vec::with_capacity(features.len());
    let mut stats = NormalizeStats::default();

    for (index, feature) in features.iter().enumerate() {
        stats.total += 1;

        match normalize(feature) {
            Ok(reading) => {
                readings.push(reading);
                stats.accepted += 1;
            }
            Err(reason) => {
                stats.rejected += 1;
                warn!(
                    "Skipping feature {} (rejection {}/{}): {}",
                    index, stats.rejected, stats.total, reason
                );
            }
        }
    }

    debug!(
        "Normalized {} features: {} accepted, {} rejected",
        stats.total, stats.accepted, stats.rejected
    );

    (readings, stats)
}

/// Converts a station's history query result into a time-ordered series.
///
/// Every feature yields a point. Undated features get timestamp 0 and sort
/// to the front.
pub fn history_points(features: &[RawFeature]) -> Vec<HistoryPoint> {
    let mut points: Vec<HistoryPoint> = features
        .iter()
        .map(|f| {
            let attrs = &f.attributes;
            HistoryPoint {
                timestamp_ms: attrs.created_ms.unwrap_or(0),
                level: attrs.water_level.unwrap_or(0.0),
                rainfall: attrs.rainfall.unwrap_or(0.0),
            }
        })
        .collect();

    points.sort_by_key(|p| p.timestamp_ms);
    points
}

fn non_blank(label: Option<&str>) -> Option<&str> {
    label.map(str::trim).filter(|s| !s.is_empty())
}

fn thresholds_of(attrs: &GaugeAttributes) -> Thresholds {
    Thresholds {
        alert: attrs.alert_level,
        minor: attrs.minor_level,
        major: attrs.major_level,
    }
}
