//! Class- and space-balanced subsampling of feature rows.
//!
//! Rows are bucketed by `(class, cell)` where the cell is the grid square of
//! the source polygon's centroid. Each class's quota is spread over its cells
//! as evenly as their sizes allow, then rows are drawn at random inside each
//! cell. Without the spatial split a few large polygons would dominate the
//! training set.

use crate::error::{PipelineError, Result};
use crate::features::FeatureRow;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;

type Cell = (i64, i64);

/// Per-class outcome of a sampling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSampling {
    /// Rows offered for this class
    pub available: usize,
    /// Rows kept
    pub selected: usize,
    /// Number of non-empty spatial cells
    pub strata: usize,
}

/// Summary of a sampling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SamplingReport {
    pub target_per_class: usize,
    pub classes: BTreeMap<String, ClassSampling>,
    /// Classes that had fewer rows than the target, sorted
    pub under_sampled: Vec<String>,
}

impl SamplingReport {
    pub fn total_selected(&self) -> usize {
        self.classes.values().map(|c| c.selected).sum()
    }
}

impl std::fmt::Display for SamplingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sampled {} rows (target {}/class):", self.total_selected(), self.target_per_class)?;
        for (class, s) in &self.classes {
            write!(f, " {}={}/{} over {} cells", class, s.selected, s.available, s.strata)?;
        }
        if !self.under_sampled.is_empty() {
            write!(f, " | under target: {}", self.under_sampled.join(", "))?;
        }
        Ok(())
    }
}

/// Draws at most `target_per_class` rows per class, spread across space.
#[derive(Debug, Clone)]
pub struct StratifiedSampler {
    target_per_class: usize,
    cell_size: f64,
    seed: u64,
}

impl StratifiedSampler {
    pub fn new(target_per_class: usize, cell_size: f64, seed: u64) -> Result<Self> {
        if target_per_class == 0 {
            return Err(PipelineError::Validation("target_per_class must be > 0".into()));
        }
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "cell_size must be a positive number, got {}",
                cell_size
            )));
        }
        Ok(Self {
            target_per_class,
            cell_size,
            seed,
        })
    }

    pub fn from_config(config: &crate::config::SamplingConfig) -> Result<Self> {
        Self::new(config.target_per_class, config.cell_size, config.seed)
    }

    fn cell_of(&self, row: &FeatureRow) -> Cell {
        let (cx, cy) = row.centroid;
        ((cx / self.cell_size).floor() as i64, (cy / self.cell_size).floor() as i64)
    }

    /// Select rows. Output is ordered by class label, then by input position.
    pub fn sample(&self, rows: Vec<FeatureRow>) -> (Vec<FeatureRow>, SamplingReport) {
        let mut by_class: BTreeMap<&str, BTreeMap<Cell, Vec<usize>>> = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            by_class
                .entry(row.class_label.as_str())
                .or_default()
                .entry(self.cell_of(row))
                .or_default()
                .push(idx);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut report = SamplingReport {
            target_per_class: self.target_per_class,
            ..Default::default()
        };
        let mut order: Vec<usize> = Vec::with_capacity(rows.len().min(by_class.len() * self.target_per_class));

        for (class, cells) in &by_class {
            let available: usize = cells.values().map(Vec::len).sum();
            let capacities: Vec<usize> = cells.values().map(Vec::len).collect();
            let quotas = water_fill(&capacities, self.target_per_class, &mut rng);

            let mut chosen = Vec::new();
            for (members, quota) in cells.values().zip(quotas) {
                let mut members = members.clone();
                members.shuffle(&mut rng);
                chosen.extend_from_slice(&members[..quota]);
            }
            chosen.sort_unstable();

            if available < self.target_per_class {
                tracing::warn!(
                    "Class '{}' has only {} rows, below the target of {}",
                    class,
                    available,
                    self.target_per_class
                );
                report.under_sampled.push(class.to_string());
            }
            report.classes.insert(
                class.to_string(),
                ClassSampling {
                    available,
                    selected: chosen.len(),
                    strata: cells.len(),
                },
            );
            order.extend(chosen);
        }

        let mut slots: Vec<Option<FeatureRow>> = rows.into_iter().map(Some).collect();
        let sampled = order.into_iter().filter_map(|idx| slots[idx].take()).collect();

        tracing::debug!("{}", report);
        (sampled, report)
    }
}

/// Spread `target` over bins with the given capacities as evenly as possible.
///
/// Each round splits what is left equally among bins that still have room;
/// the remainder of an uneven split goes to randomly chosen bins.
fn water_fill(capacities: &[usize], target: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut quotas = vec![0usize; capacities.len()];
    let total: usize = capacities.iter().sum();
    let mut remaining = target.min(total);

    while remaining > 0 {
        let mut open: Vec<usize> = (0..capacities.len()).filter(|&i| quotas[i] < capacities[i]).collect();
        let share = remaining / open.len();

        if share == 0 {
            open.shuffle(rng);
            for &i in open.iter().take(remaining) {
                quotas[i] += 1;
            }
            break;
        }

        for &i in &open {
            let take = share.min(capacities[i] - quotas[i]);
            quotas[i] += take;
            remaining -= take;
        }
    }

    quotas
}
