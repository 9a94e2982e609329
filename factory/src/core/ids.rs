//! Id assignment for feature records loaded from disk.

use std::collections::HashSet;

use crate::feature::{Feature, FeatureRecord};

/// Generated id for the record at `index`.
pub fn generated_id(index: usize, timestamp_ms: i64) -> String {
    format!("feature-{index}-{timestamp_ms}")
}

/// Result of [`assign_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedFeatures {
    pub features: Vec<Feature>,
    /// Ids that were generated (missing, blank or duplicate in the input).
    pub generated: Vec<String>,
}

/// Give every record a unique id.
///
/// Records without an id (or with a blank one) get `feature-<index>-<timestamp>`.
/// A later record reusing an id already seen is treated the same way, so the
/// output never contains two features with one id.
pub fn assign_ids(records: Vec<FeatureRecord>, timestamp_ms: i64) -> AssignedFeatures {
    let mut seen = HashSet::new();
    let mut generated = Vec::new();
    let mut features = Vec::with_capacity(records.len());

    for (index, mut record) in records.into_iter().enumerate() {
        let id = match record.id.take() {
            Some(id) if !id.trim().is_empty() && !seen.contains(&id) => id,
            _ => {
                let mut id = generated_id(index, timestamp_ms);
                // A hand-authored id could already look generated.
                let mut bump = 0;
                while seen.contains(&id) {
                    bump += 1;
                    id = format!("{}-{bump}", generated_id(index, timestamp_ms));
                }
                generated.push(id.clone());
                id
            }
        };
        seen.insert(id.clone());
        features.push(record.into_feature(id));
    }

    AssignedFeatures {
        features,
        generated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Option<&str>) -> FeatureRecord {
        FeatureRecord {
            id: id.map(str::to_string),
            description: "d".to_string(),
            ..FeatureRecord::default()
        }
    }

    #[test]
    fn keeps_existing_ids_and_fills_missing_ones() {
        let assigned = assign_ids(vec![record(Some("f1")), record(None), record(Some(" "))], 42);
        let ids: Vec<&str> = assigned.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "feature-1-42", "feature-2-42"]);
        assert_eq!(assigned.generated, vec!["feature-1-42", "feature-2-42"]);
    }

    #[test]
    fn duplicate_ids_are_reassigned_for_later_records() {
        let assigned = assign_ids(vec![record(Some("dup")), record(Some("dup"))], 7);
        assert_eq!(assigned.features[0].id, "dup");
        assert_eq!(assigned.features[1].id, "feature-1-7");
    }

    #[test]
    fn generated_id_never_collides_with_authored_one() {
        let assigned = assign_ids(vec![record(Some("feature-1-7")), record(None)], 7);
        assert_eq!(assigned.features[1].id, "feature-1-7-1");
    }

    #[test]
    fn nothing_generated_when_all_ids_present() {
        let assigned = assign_ids(vec![record(Some("a")), record(Some("b"))], 1);
        assert!(assigned.generated.is_empty());
    }
}
