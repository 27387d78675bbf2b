//! Pure stages that turn one raw feature batch into the dashboard model.
//!
//! ```text
//! RawFeature[] -> normalize -> StationReading[] -> reduce -> snapshots -> group -> BasinGroup[]
//! ```
//!
//! None of the stages hold state between calls; every poll builds a fresh
//! [`LiveData`] and the previous one is replaced wholesale.

pub mod classify;
pub mod group;
pub mod normalize;
pub mod reduce;
pub mod summary;

pub use classify::{classify, classify_with};
pub use group::group;
pub use normalize::{normalize, normalize_batch, NormalizeStats, Rejected};
pub use reduce::reduce;

use crate::model::{LiveData, RawFeature};

/// Runs normalize, reduce and group over one batch.
pub fn process(features: &[RawFeature]) -> LiveData {
    let (readings, stats) = normalize_batch(features);
    let snapshots = reduce(&readings);
    let basins = group(snapshots.values());

    LiveData {
        snapshots,
        basins,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GaugeAttributes, SeverityTier, StationId};

    fn raw(station: &str, basin: &str, level: f64, created_ms: i64) -> RawFeature {
        RawFeature {
            attributes: GaugeAttributes {
                station: Some(station.to_string()),
                basin: Some(basin.to_string()),
                water_level: Some(level),
                alert_level: Some(4.0),
                minor_level: Some(5.0),
                major_level: Some(6.0),
                created_ms: Some(created_ms),
                ..Default::default()
            },
            geometry: None,
        }
    }

    #[test]
    fn test_process_builds_consistent_views() {
        let features = vec![
            raw("Hanwella", "Kelani River", 3.0, 100),
            raw("Hanwella", "Kelani River", 4.0, 200),
            raw("Thanthirimale", "Malwathu Oya", 6.2, 150),
            RawFeature::default(),
        ];

        let data = process(&features);

        assert_eq!(data.stats.total, 4);
        assert_eq!(data.stats.rejected, 1);
        assert_eq!(data.snapshots.len(), 2);
        assert_eq!(data.basins.len(), 2);
        assert_eq!(
            data.snapshots[&StationId::from_label("Hanwella")].tier,
            SeverityTier::Alert
        );
        assert_eq!(data.basins[1].stations[0].tier, SeverityTier::Major);
    }

    #[test]
    fn test_process_empty_batch() {
        let data = process(&[]);
        assert!(data.snapshots.is_empty());
        assert!(data.basins.is_empty());
        assert_eq!(data.stats, NormalizeStats::default());
    }
}
