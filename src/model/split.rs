//! Train/test partitioning of feature rows.

use super::SplitMethod;
use crate::error::{PipelineError, Result};
use crate::features::FeatureRow;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Row indices of each partition, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Number of test units out of `n`: rounded fraction, at least one and
/// at most `n - 1` whenever there are two or more units.
fn test_count(n: usize, fraction: f64) -> usize {
    if n < 2 {
        return 0;
    }
    ((n as f64 * fraction).round() as usize).clamp(1, n - 1)
}

/// Partition `rows` into training and test sets, stratified by class.
///
/// With [`SplitMethod::Feature`] whole polygons move together, so no polygon
/// contributes to both sides. [`SplitMethod::Pixel`] splits rows directly,
/// which lets neighbouring pixels of one polygon leak into the test set and
/// overstates accuracy.
pub fn split_rows(rows: &[FeatureRow], fraction: f64, method: SplitMethod, seed: u64) -> Result<TrainTestSplit> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(PipelineError::Validation(format!(
            "train_test_split must be in (0, 1), got {}",
            fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut test: HashSet<usize> = HashSet::new();

    match method {
        SplitMethod::Feature => {
            // polygon -> rows, and class -> polygons in first-seen order
            let mut members: HashMap<&str, Vec<usize>> = HashMap::new();
            let mut by_class: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for (idx, row) in rows.iter().enumerate() {
                let entry = members.entry(row.polygon_id.as_str()).or_default();
                if entry.is_empty() {
                    by_class
                        .entry(row.class_label.as_str())
                        .or_default()
                        .push(row.polygon_id.as_str());
                }
                entry.push(idx);
            }

            for polygons in by_class.values_mut() {
                polygons.shuffle(&mut rng);
                let n_test = test_count(polygons.len(), fraction);
                for polygon in &polygons[..n_test] {
                    test.extend(&members[polygon]);
                }
            }
        }
        SplitMethod::Pixel => {
            let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (idx, row) in rows.iter().enumerate() {
                by_class.entry(row.class_label.as_str()).or_default().push(idx);
            }
            for indices in by_class.values_mut() {
                indices.shuffle(&mut rng);
                let n_test = test_count(indices.len(), fraction);
                test.extend(&indices[..n_test]);
            }
        }
    }

    let (test, train): (Vec<usize>, Vec<usize>) = (0..rows.len()).partition(|idx| test.contains(idx));
    Ok(TrainTestSplit { train, test })
}
