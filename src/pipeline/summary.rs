//! Derived views over a snapshot set: tier counts and the alert feed order.

use serde::Serialize;

use crate::model::{SeverityTier, StationSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub normal: usize,
    pub alert: usize,
    pub minor: usize,
    pub major: usize,
    pub average_level: f64,
}

impl StatusSummary {
    /// Stations at alert tier or above.
    pub fn active_alerts(&self) -> usize {
        self.alert + self.minor + self.major
    }

    pub fn count(&self, tier: SeverityTier) -> usize {
        match tier {
            SeverityTier::Normal => self.normal,
            SeverityTier::Alert => self.alert,
            SeverityTier::Minor => self.minor,
            SeverityTier::Major => self.major,
        }
    }
}

pub fn summarize<'a, I>(snapshots: I) -> StatusSummary
where
    I: IntoIterator<Item = &'a StationSnapshot>,
{
    let mut summary = StatusSummary::default();
    let mut level_sum = 0.0;

    for snapshot in snapshots {
        summary.total += 1;
        level_sum += snapshot.level;
        match snapshot.tier {
            SeverityTier::Normal => summary.normal += 1,
            SeverityTier::Alert => summary.alert += 1,
            SeverityTier::Minor => summary.minor += 1,
            SeverityTier::Major => summary.major += 1,
        }
    }

    if summary.total > 0 {
        summary.average_level = level_sum / summary.total as f64;
    }
    summary
}

/// Most severe first, then highest level, then station identity.
pub fn alert_feed<'a, I>(snapshots: I) -> Vec<&'a StationSnapshot>
where
    I: IntoIterator<Item = &'a StationSnapshot>,
{
    let mut feed: Vec<&StationSnapshot> = snapshots.into_iter().collect();
    feed.sort_by(|a, b| {
        b.tier
            .cmp(&a.tier)
            .then_with(|| b.level.total_cmp(&a.level))
            .then_with(|| a.id.cmp(&b.id))
    });
    feed
}

pub fn filter_by_tier<'a, I>(snapshots: I, tier: SeverityTier) -> Vec<&'a StationSnapshot>
where
    I: IntoIterator<Item = &'a StationSnapshot>,
{
    snapshots.into_iter().filter(|s| s.tier == tier).collect()
}
