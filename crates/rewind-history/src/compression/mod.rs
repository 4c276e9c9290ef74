#![forbid(unsafe_code)]

//! History compression strategies.
//!
//! A strategy thins the `past` sequence of a
//! [`HistoryManager`](crate::HistoryManager) after each add. Strategies only
//! drop snapshots; they never reorder or rewrite them, so
//! `compress(h).len() <= h.len()` and the survivors keep their order.
//!
//! | Name (aliases)                     | Keeps                                   |
//! |------------------------------------|-----------------------------------------|
//! | `time` / `time-based`              | recent window, every Nth older snapshot |
//! | `size` / `size-based`              | every Nth snapshot plus the newest      |
//! | `significance` / `significance-based` | snapshots that change enough keys   |
//! | `none`                             | everything                              |

mod significance;
mod size_based;
mod time_based;

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, SystemClock};
use crate::error::{HistoryError, Result};
use crate::snapshot::Snapshot;

pub use significance::SignificanceStrategy;
pub use size_based::SizeBasedStrategy;
pub use time_based::TimeBasedStrategy;

pub const DEFAULT_MIN_SNAPSHOTS: usize = 10;

/// Size accounting for the last `compress` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionMetadata {
    pub original_size: usize,
    pub compressed_size: usize,
    /// `compressed_size / original_size`, 1.0 for empty input.
    pub compression_ratio: f64,
}

impl CompressionMetadata {
    #[must_use]
    pub fn new(original_size: usize, compressed_size: usize) -> Self {
        let compression_ratio = if original_size == 0 {
            1.0
        } else {
            compressed_size as f64 / original_size as f64
        };
        Self {
            original_size,
            compressed_size,
            compression_ratio,
        }
    }
}

pub trait CompressionStrategy {
    fn name(&self) -> &'static str;

    /// Whether `history` (the past sequence) should be compressed now.
    fn should_compress(&self, history: &[Snapshot], current_index: usize) -> bool;

    /// The retained subset of `history`, in order. Records metadata.
    fn compress(&mut self, history: &[Snapshot]) -> Vec<Snapshot>;

    /// Metadata of the last `compress` call.
    fn metadata(&self) -> Option<CompressionMetadata>;
}

/// Options shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyBase {
    pub min_snapshots: usize,
    pub enabled: bool,
}

impl Default for StrategyBase {
    fn default() -> Self {
        Self {
            min_snapshots: DEFAULT_MIN_SNAPSHOTS,
            enabled: true,
        }
    }
}

impl StrategyBase {
    pub(crate) fn admits(&self, history: &[Snapshot]) -> bool {
        self.enabled && history.len() >= self.min_snapshots
    }
}

/// Flat option bag accepted by [`CompressionFactory`]. Strategy-specific
/// fields left as `None` take that strategy's default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionOptions {
    pub min_snapshots: usize,
    pub enabled: bool,
    pub keep_recent_for_ms: Option<u64>,
    pub keep_every: Option<usize>,
    pub max_snapshots: Option<usize>,
    pub min_change_threshold: Option<f64>,
    pub max_consecutive_similar: Option<usize>,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        let base = StrategyBase::default();
        Self {
            min_snapshots: base.min_snapshots,
            enabled: base.enabled,
            keep_recent_for_ms: None,
            keep_every: None,
            max_snapshots: None,
            min_change_threshold: None,
            max_consecutive_similar: None,
        }
    }
}

impl CompressionOptions {
    #[must_use]
    pub fn with_min_snapshots(mut self, min: usize) -> Self {
        self.min_snapshots = min;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_keep_every(mut self, every: usize) -> Self {
        self.keep_every = Some(every);
        self
    }

    #[must_use]
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = Some(max);
        self
    }

    pub(crate) fn base(&self) -> StrategyBase {
        StrategyBase {
            min_snapshots: self.min_snapshots,
            enabled: self.enabled,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.keep_every == Some(0) {
            return Err(HistoryError::InvalidOption {
                name: "keepEvery",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(threshold) = self.min_change_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(HistoryError::InvalidOption {
                name: "minChangeThreshold",
                reason: format!("{threshold} is outside 0..=1"),
            });
        }
        Ok(())
    }
}

/// Strategy selection as loaded from host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionConfig {
    pub strategy: String,
    pub options: CompressionOptions,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            strategy: "none".into(),
            options: CompressionOptions::default(),
        }
    }
}

impl CompressionConfig {
    pub fn build(&self) -> Result<Box<dyn CompressionStrategy>> {
        CompressionFactory::create(&self.strategy, &self.options)
    }

    pub fn build_with_clock(&self, clock: SharedClock) -> Result<Box<dyn CompressionStrategy>> {
        CompressionFactory::create_with_clock(&self.strategy, &self.options, clock)
    }
}

pub struct CompressionFactory;

impl CompressionFactory {
    /// Build a strategy by name. Time-based strategies use the system clock.
    pub fn create(name: &str, options: &CompressionOptions) -> Result<Box<dyn CompressionStrategy>> {
        Self::create_with_clock(name, options, Rc::new(SystemClock))
    }

    pub fn create_with_clock(
        name: &str,
        options: &CompressionOptions,
        clock: SharedClock,
    ) -> Result<Box<dyn CompressionStrategy>> {
        options.validate()?;
        let strategy: Box<dyn CompressionStrategy> = match name {
            "time" | "time-based" => Box::new(TimeBasedStrategy::from_options(options, clock)),
            "size" | "size-based" => Box::new(SizeBasedStrategy::from_options(options)),
            "significance" | "significance-based" => {
                Box::new(SignificanceStrategy::from_options(options))
            }
            "none" => Box::new(NoCompression::default()),
            other => return Err(HistoryError::UnknownStrategy(other.to_string())),
        };
        Ok(strategy)
    }
}

/// Never compresses.
#[derive(Debug, Default)]
pub struct NoCompression {
    last: Option<CompressionMetadata>,
}

impl CompressionStrategy for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn should_compress(&self, _history: &[Snapshot], _current_index: usize) -> bool {
        false
    }

    fn compress(&mut self, history: &[Snapshot]) -> Vec<Snapshot> {
        self.last = Some(CompressionMetadata::new(history.len(), history.len()));
        history.to_vec()
    }

    fn metadata(&self) -> Option<CompressionMetadata> {
        self.last
    }
}

/// Keep index 0 and every `every`-th index after it.
pub(crate) fn every_nth(index: usize, every: usize) -> bool {
    index % every.max(1) == 0
}
