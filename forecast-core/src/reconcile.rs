//! Merging a freshly fetched snapshot into the stored one.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::{error::ForecastError, model::Snapshot};

/// Outer-join `base` and `incoming` on time, keeping the incoming row on collisions.
///
/// Rows are taken base-first then incoming, and the last occurrence of each
/// timestamp wins; the result is ordered by time.
pub fn merge(base: &Snapshot, incoming: &Snapshot) -> Result<Snapshot, ForecastError> {
    if base.city() != incoming.city() {
        return Err(ForecastError::CityMismatch {
            base: base.city().to_string(),
            incoming: incoming.city().to_string(),
        });
    }

    let mut by_time = BTreeMap::<NaiveDateTime, _>::new();
    for row in base.observations().iter().chain(incoming.observations()) {
        by_time.insert(row.time, row.clone());
    }

    Ok(Snapshot::from_ordered(
        base.city(),
        by_time.into_values().collect(),
    ))
}

/// What a merge changed, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub base_rows: usize,
    pub incoming_rows: usize,
    pub merged_rows: usize,
    /// Incoming timestamps absent from the base.
    pub added: usize,
    /// Shared timestamps whose values differed.
    pub updated: usize,
}

impl MergeStats {
    pub fn between(base: &Snapshot, incoming: &Snapshot, merged: &Snapshot) -> Self {
        let existing: BTreeMap<_, _> = base.observations().iter().map(|o| (o.time, o)).collect();
        let (added, updated) =
            incoming
                .observations()
                .iter()
                .fold((0, 0), |(added, updated), o| match existing.get(&o.time) {
                    None => (added + 1, updated),
                    Some(old) if *old != o => (added, updated + 1),
                    Some(_) => (added, updated),
                });

        Self {
            base_rows: base.len(),
            incoming_rows: incoming.len(),
            merged_rows: merged.len(),
            added,
            updated,
        }
    }
}
