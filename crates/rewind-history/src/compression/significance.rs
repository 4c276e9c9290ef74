use std::collections::BTreeMap;

use rewind_value::{Value, ValueComparator};
use tracing::debug;

use super::{CompressionMetadata, CompressionOptions, CompressionStrategy, StrategyBase};
use crate::snapshot::Snapshot;

pub const DEFAULT_MIN_CHANGE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_MAX_CONSECUTIVE_SIMILAR: usize = 3;

/// Drops runs of near-identical snapshots.
///
/// Each snapshot is compared with the last kept one by the share of atom
/// keys whose values changed. A snapshot at or above `min_change_threshold`
/// is significant. Up to `max_consecutive_similar` insignificant snapshots
/// in a row are kept; later ones are dropped until a significant change
/// resets the run.
#[derive(Debug)]
pub struct SignificanceStrategy {
    base: StrategyBase,
    min_change_threshold: f64,
    max_consecutive_similar: usize,
    comparator: ValueComparator,
    last: Option<CompressionMetadata>,
}

impl SignificanceStrategy {
    #[must_use]
    pub fn new(base: StrategyBase, min_change_threshold: f64, max_consecutive_similar: usize) -> Self {
        Self {
            base,
            min_change_threshold,
            max_consecutive_similar,
            comparator: ValueComparator::new(),
            last: None,
        }
    }

    pub(crate) fn from_options(options: &CompressionOptions) -> Self {
        Self::new(
            options.base(),
            options
                .min_change_threshold
                .unwrap_or(DEFAULT_MIN_CHANGE_THRESHOLD),
            options
                .max_consecutive_similar
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_SIMILAR),
        )
    }

    fn change_ratio(&self, before: &BTreeMap<String, Value>, after: &BTreeMap<String, Value>) -> f64 {
        self.comparator.changed_key_ratio(before, after)
    }
}

impl CompressionStrategy for SignificanceStrategy {
    fn name(&self) -> &'static str {
        "significance-based"
    }

    fn should_compress(&self, history: &[Snapshot], _current_index: usize) -> bool {
        self.base.admits(history)
    }

    fn compress(&mut self, history: &[Snapshot]) -> Vec<Snapshot> {
        let mut kept = Vec::with_capacity(history.len());
        let mut iter = history.iter();
        if let Some(first) = iter.next() {
            let mut baseline = first.decoded_state();
            let mut similar_run = 0usize;
            kept.push(first.clone());
            for snapshot in iter {
                let state = snapshot.decoded_state();
                let ratio = self.change_ratio(&baseline, &state);
                if ratio >= self.min_change_threshold {
                    similar_run = 0;
                } else if similar_run < self.max_consecutive_similar {
                    similar_run += 1;
                } else {
                    continue;
                }
                kept.push(snapshot.clone());
                baseline = state;
            }
        }
        debug!(strategy = self.name(), before = history.len(), after = kept.len(), "history compressed");
        self.last = Some(CompressionMetadata::new(history.len(), kept.len()));
        kept
    }

    fn metadata(&self) -> Option<CompressionMetadata> {
        self.last
    }
}
