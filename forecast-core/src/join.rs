use std::collections::HashMap;

use crate::{
    error::ForecastError,
    model::{AugmentedRow, AugmentedSnapshot, CovariateSeries, Snapshot},
};

/// Inner join on time: only timestamps present in both inputs survive, in the
/// snapshot's order.
pub fn join_covariate(
    base: &Snapshot,
    covariate: &CovariateSeries,
) -> Result<AugmentedSnapshot, ForecastError> {
    if base.city() != covariate.city {
        return Err(ForecastError::CityMismatch {
            base: base.city().to_string(),
            incoming: covariate.city.to_string(),
        });
    }

    let by_time: HashMap<_, _> = covariate.points.iter().copied().collect();
    let rows: Vec<AugmentedRow> = base
        .observations()
        .iter()
        .filter_map(|o| {
            by_time.get(&o.time).map(|value| AugmentedRow {
                observation: o.clone(),
                apparent_temperature: *value,
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(ForecastError::EmptyJoin {
            covariate: covariate.column.clone(),
        });
    }

    tracing::debug!(
        base = base.len(),
        covariate = covariate.len(),
        joined = rows.len(),
        "joined covariate"
    );
    Ok(AugmentedSnapshot {
        city: base.city(),
        rows,
    })
}
