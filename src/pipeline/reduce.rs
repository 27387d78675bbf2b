use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::model::{StationId, StationReading, StationSnapshot};
use crate::pipeline::classify::classify_with;

/// Folds a batch of readings into one snapshot per station.
///
/// The reading with the greatest timestamp wins regardless of arrival order.
/// On equal timestamps the later element of `readings` wins. Severity is
/// recomputed here for every surviving reading.
pub fn reduce(readings: &[StationReading]) -> BTreeMap<StationId, StationSnapshot> {
    let mut latest: BTreeMap<StationId, &StationReading> = BTreeMap::new();

    for reading in readings {
        match latest.entry(reading.station_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(reading);
            }
            Entry::Occupied(mut slot) => {
                if reading.timestamp_ms >= slot.get().timestamp_ms {
                    slot.insert(reading);
                }
            }
        }
    }

    latest
        .into_iter()
        .map(|(id, reading)| (id, snapshot_of(reading)))
        .collect()
}

fn snapshot_of(reading: &StationReading) -> StationSnapshot {
    StationSnapshot {
        id: reading.station_id.clone(),
        name: reading.station_name.clone(),
        basin_id: reading.basin_id.clone(),
        basin_name: reading.basin_name.clone(),
        level: reading.level,
        rainfall: reading.rainfall,
        thresholds: reading.thresholds,
        tier: classify_with(reading.level, &reading.thresholds),
        last_updated_ms: reading.timestamp_ms,
        coordinates: reading.coordinates,
    }
}
