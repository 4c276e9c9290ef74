use tracing::debug;

use super::{CompressionMetadata, CompressionOptions, CompressionStrategy, StrategyBase, every_nth};
use crate::clock::SharedClock;
use crate::snapshot::Snapshot;

pub const DEFAULT_KEEP_RECENT_FOR_MS: u64 = 60_000;
pub const DEFAULT_KEEP_EVERY: usize = 5;

/// Keeps everything inside a recent time window and every `keep_every`-th
/// snapshot older than it.
pub struct TimeBasedStrategy {
    base: StrategyBase,
    keep_recent_for_ms: u64,
    keep_every: usize,
    clock: SharedClock,
    last: Option<CompressionMetadata>,
}

impl TimeBasedStrategy {
    #[must_use]
    pub fn new(base: StrategyBase, keep_recent_for_ms: u64, keep_every: usize, clock: SharedClock) -> Self {
        Self {
            base,
            keep_recent_for_ms,
            keep_every: keep_every.max(1),
            clock,
            last: None,
        }
    }

    pub(crate) fn from_options(options: &CompressionOptions, clock: SharedClock) -> Self {
        Self::new(
            options.base(),
            options.keep_recent_for_ms.unwrap_or(DEFAULT_KEEP_RECENT_FOR_MS),
            options.keep_every.unwrap_or(DEFAULT_KEEP_EVERY),
            clock,
        )
    }

    fn cutoff(&self) -> i64 {
        let window = i64::try_from(self.keep_recent_for_ms).unwrap_or(i64::MAX);
        self.clock.now_ms().saturating_sub(window)
    }
}

impl CompressionStrategy for TimeBasedStrategy {
    fn name(&self) -> &'static str {
        "time-based"
    }

    fn should_compress(&self, history: &[Snapshot], _current_index: usize) -> bool {
        let cutoff = self.cutoff();
        self.base.admits(history) && history.iter().any(|s| s.metadata.timestamp < cutoff)
    }

    fn compress(&mut self, history: &[Snapshot]) -> Vec<Snapshot> {
        let cutoff = self.cutoff();
        let mut old_index = 0usize;
        let kept: Vec<Snapshot> = history
            .iter()
            .filter(|snapshot| {
                if snapshot.metadata.timestamp >= cutoff {
                    return true;
                }
                let keep = every_nth(old_index, self.keep_every);
                old_index += 1;
                keep
            })
            .cloned()
            .collect();
        let metadata = CompressionMetadata::new(history.len(), kept.len());
        debug!(strategy = self.name(), before = history.len(), after = kept.len(), "history compressed");
        self.last = Some(metadata);
        kept
    }

    fn metadata(&self) -> Option<CompressionMetadata> {
        self.last
    }
}
