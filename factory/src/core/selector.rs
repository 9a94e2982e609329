//! Deterministic selection logic for the autonomous loop.

use crate::feature::{Feature, FeatureStatus};

/// First feature in file order that is not yet verified.
///
/// List order is the only priority: an earlier entry always wins.
pub fn next_open_feature(features: &[Feature]) -> Option<&Feature> {
    features
        .iter()
        .find(|feature| feature.status != FeatureStatus::Verified)
}

pub fn find_feature<'a>(features: &'a [Feature], id: &str) -> Option<&'a Feature> {
    features.iter().find(|feature| feature.id == id)
}
