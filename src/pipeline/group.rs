use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{BasinGroup, BasinId, StationSnapshot};

/// Partitions snapshots into basins, ordered by display name.
///
/// Input is first put into station-identity order so that "first snapshot
/// seen" (which supplies a basin's display name) does not depend on how the
/// caller happened to order the slice. Basins and the stations within each
/// basin are then sorted case-insensitively by display name, with identity as
/// the tie-break.
pub fn group<'a, I>(snapshots: I) -> Vec<BasinGroup>
where
    I: IntoIterator<Item = &'a StationSnapshot>,
{
    let mut ordered: Vec<&StationSnapshot> = snapshots.into_iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let mut index: HashMap<&BasinId, usize> = HashMap::new();
    let mut basins: Vec<BasinGroup> = Vec::new();

    for snapshot in ordered {
        let slot = *index.entry(&snapshot.basin_id).or_insert_with(|| {
            basins.push(BasinGroup {
                id: snapshot.basin_id.clone(),
                name: snapshot.basin_name.clone(),
                stations: Vec::new(),
            });
            basins.len() - 1
        });
        basins[slot].stations.push(snapshot.clone());
    }

    for basin in &mut basins {
        basin
            .stations
            .sort_by(|a, b| by_display_name(&a.name, &b.name).then_with(|| a.id.cmp(&b.id)));
    }
    basins.sort_by(|a, b| by_display_name(&a.name, &b.name).then_with(|| a.id.cmp(&b.id)));

    basins
}

fn by_display_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
