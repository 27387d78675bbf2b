//! Flood severity classification.

use crate::model::{SeverityTier, Thresholds};

/// Maps a water level onto a severity tier.
///
/// Thresholds are checked from the top down: major, then minor, then alert.
/// A missing threshold makes its tier unreachable; it is never read as zero.
/// The ordering of the thresholds themselves is not validated, so a feed that
/// supplies `major < alert` gets the literal top-down evaluation.
pub fn classify(
    level: f64,
    alert: Option<f64>,
    minor: Option<f64>,
    major: Option<f64>,
) -> SeverityTier {
    if major.is_some_and(|t| level >= t) {
        SeverityTier::Major
    } else if minor.is_some_and(|t| level >= t) {
        SeverityTier::Minor
    } else if alert.is_some_and(|t| level >= t) {
        SeverityTier::Alert
    } else {
        SeverityTier::Normal
    }
}

/// [`classify`] against a station's threshold set.
pub fn classify_with(level: f64, thresholds: &Thresholds) -> SeverityTier {
    classify(level, thresholds.alert, thresholds.minor, thresholds.major)
}
