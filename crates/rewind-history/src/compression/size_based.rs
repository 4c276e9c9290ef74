use tracing::debug;

use super::{CompressionMetadata, CompressionOptions, CompressionStrategy, StrategyBase, every_nth};
use crate::snapshot::Snapshot;

pub const DEFAULT_MAX_SNAPSHOTS: usize = 50;
pub const DEFAULT_KEEP_EVERY: usize = 2;

/// Thins history once it grows past `max_snapshots`, keeping every
/// `keep_every`-th snapshot and always the newest one.
#[derive(Debug)]
pub struct SizeBasedStrategy {
    base: StrategyBase,
    max_snapshots: usize,
    keep_every: usize,
    last: Option<CompressionMetadata>,
}

impl SizeBasedStrategy {
    #[must_use]
    pub fn new(base: StrategyBase, max_snapshots: usize, keep_every: usize) -> Self {
        Self {
            base,
            max_snapshots,
            keep_every: keep_every.max(1),
            last: None,
        }
    }

    pub(crate) fn from_options(options: &CompressionOptions) -> Self {
        Self::new(
            options.base(),
            options.max_snapshots.unwrap_or(DEFAULT_MAX_SNAPSHOTS),
            options.keep_every.unwrap_or(DEFAULT_KEEP_EVERY),
        )
    }
}

impl CompressionStrategy for SizeBasedStrategy {
    fn name(&self) -> &'static str {
        "size-based"
    }

    fn should_compress(&self, history: &[Snapshot], _current_index: usize) -> bool {
        self.base.admits(history) && history.len() > self.max_snapshots
    }

    fn compress(&mut self, history: &[Snapshot]) -> Vec<Snapshot> {
        let newest = history.len().saturating_sub(1);
        let kept: Vec<Snapshot> = history
            .iter()
            .enumerate()
            .filter(|(i, _)| every_nth(*i, self.keep_every) || *i == newest)
            .map(|(_, s)| s.clone())
            .collect();
        debug!(strategy = self.name(), before = history.len(), after = kept.len(), "history compressed");
        self.last = Some(CompressionMetadata::new(history.len(), kept.len()));
        kept
    }

    fn metadata(&self) -> Option<CompressionMetadata> {
        self.last
    }
}
