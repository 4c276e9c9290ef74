#![forbid(unsafe_code)]

//! Wall-clock sources for snapshot timestamps and time-based compression.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use web_time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Shared clock handle.
pub type SharedClock = Rc<dyn Clock>;

/// Real time via `web_time`, so the same code runs natively and on wasm.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<i64>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let ms = i64::try_from(delta.as_millis()).unwrap_or(i64::MAX);
        self.advance_ms(ms);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.set(self.now_ms.get().saturating_add(ms));
    }

    pub fn set_ms(&self, ms: i64) {
        self.now_ms.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.get()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now_ms", &self.now_ms.get())
            .finish()
    }
}
