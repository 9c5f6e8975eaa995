//! Turns the outcomes of one run into the records it reports.
//!
//! Scalar measurements collapse into a single [`ResultRecord::Aggregate`].
//! Series measurements are passed through unaggregated, one record per
//! series per iteration. A failure anywhere replaces everything with a
//! single [`ResultRecord::Failure`].

use crate::types::{IterationOutcome, ResultRecord, Summary};

/// Min, max, mean, median and population standard deviation of `samples`.
/// Returns `None` for an empty slice.
pub fn compute_summary(samples: &[f64]) -> Option<Summary> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    // Population variance: divide by N, not N - 1.
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    Some(Summary {
        min: sorted[0],
        max: sorted[n - 1],
        mean,
        median,
        std_dev: variance.sqrt(),
    })
}

/// Builds the records for a run from its iteration outcomes.
pub fn summarize(outcomes: &[IterationOutcome]) -> Vec<ResultRecord> {
    if let Some(failure) = outcomes.iter().find_map(|o| match o {
        IterationOutcome::Failed(f) => Some(f),
        _ => None,
    }) {
        return vec![ResultRecord::Failure(failure.clone())];
    }

    let scalars: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| match o {
            IterationOutcome::Measured(v) => Some(*v),
            _ => None,
        })
        .collect();

    let mut records: Vec<ResultRecord> = compute_summary(&scalars)
        .map(ResultRecord::Aggregate)
        .into_iter()
        .collect();

    for outcome in outcomes {
        if let IterationOutcome::MeasuredSeries(series) = outcome {
            records.extend(series.iter().map(|(name, value)| ResultRecord::Series {
                series_name: name.clone(),
                value: *value,
            }));
        }
    }

    records
}
