#![forbid(unsafe_code)]

//! Bounded, linear undo/redo history of snapshots.
//!
//! # Invariants
//!
//! 1. `past.len() + current + future.len() <= max_history` after every
//!    mutating operation.
//! 2. Adding a snapshot discards `future` (no branching).
//! 3. `undo` followed by `redo` returns to the same current snapshot.
//! 4. Compression only touches `past` and never reorders it.
//!
//! Listeners receive a [`HistoryEvent`] after every successful mutation.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rewind_runtime::Subscription;
use serde::Serialize;
use tracing::debug;

use crate::compression::{CompressionMetadata, CompressionStrategy};
use crate::snapshot::Snapshot;

pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Mutation performed on the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HistoryOperation {
    Add { snapshot_id: String },
    Undo,
    Redo,
    JumpTo { index: usize },
    Clear,
    Compress { metadata: CompressionMetadata },
}

/// Event delivered to history listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HistoryEvent {
    Change { operation: HistoryOperation },
}

type Listener = Rc<dyn Fn(&HistoryEvent)>;
type ListenerList = Rc<RefCell<Vec<(u64, Listener)>>>;

pub struct HistoryManager {
    max_history: usize,
    past: VecDeque<Snapshot>,
    current: Option<Snapshot>,
    future: VecDeque<Snapshot>,
    strategy: Option<Box<dyn CompressionStrategy>>,
    compression_metadata: Option<CompressionMetadata>,
    listeners: ListenerList,
    next_listener_key: u64,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl HistoryManager {
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            past: VecDeque::new(),
            current: None,
            future: VecDeque::new(),
            strategy: None,
            compression_metadata: None,
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_listener_key: 0,
        }
    }

    #[must_use]
    pub fn with_compression(mut self, strategy: Box<dyn CompressionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn set_compression(&mut self, strategy: Option<Box<dyn CompressionStrategy>>) {
        self.strategy = strategy;
    }

    /// Make `snapshot` current.
    pub fn add(&mut self, snapshot: Snapshot) {
        if self.max_history == 0 {
            debug!(snapshot = %snapshot.id, "history disabled, snapshot dropped");
            return;
        }
        let snapshot_id = snapshot.id.clone();
        if let Some(previous) = self.current.replace(snapshot) {
            self.past.push_back(previous);
        }
        self.future.clear();
        while self.past.len() > self.max_history - 1 {
            self.past.pop_front();
        }
        debug!(snapshot = %snapshot_id, past = self.past.len(), "history add");
        self.emit(HistoryOperation::Add { snapshot_id });
        self.maybe_compress();
    }

    fn maybe_compress(&mut self) {
        let current_index = self.past.len();
        let Some(strategy) = self.strategy.as_mut() else {
            return;
        };
        let past = self.past.make_contiguous();
        if !strategy.should_compress(past, current_index) {
            return;
        }
        let compressed = strategy.compress(past);
        let metadata = strategy.metadata();
        debug!(
            strategy = strategy.name(),
            before = current_index,
            after = compressed.len(),
            "history compression pass"
        );
        self.past = compressed.into();
        if let Some(metadata) = metadata {
            self.compression_metadata = Some(metadata);
            self.emit(HistoryOperation::Compress { metadata });
        }
    }

    /// Step back one snapshot. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<Snapshot> {
        let previous = self.past.pop_back()?;
        if let Some(current) = self.current.replace(previous) {
            self.future.push_front(current);
        }
        debug!(past = self.past.len(), future = self.future.len(), "history undo");
        self.emit(HistoryOperation::Undo);
        self.current.clone()
    }

    /// Step forward one snapshot. `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<Snapshot> {
        let next = self.future.pop_front()?;
        if let Some(current) = self.current.replace(next) {
            self.past.push_back(current);
        }
        debug!(past = self.past.len(), future = self.future.len(), "history redo");
        self.emit(HistoryOperation::Redo);
        self.current.clone()
    }

    /// Make the `index`-th entry of [`history`](Self::history) current.
    /// Out-of-range indices leave the history untouched.
    pub fn jump_to(&mut self, index: usize) -> Option<Snapshot> {
        if index >= self.len() {
            return None;
        }
        let mut all = self.history();
        let future = all.split_off(index + 1);
        self.current = all.pop();
        self.past = all.into();
        self.future = future.into();
        debug!(index, "history jump");
        self.emit(HistoryOperation::JumpTo { index });
        self.current.clone()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.current = None;
        self.future.clear();
        debug!("history cleared");
        self.emit(HistoryOperation::Clear);
    }

    /// Register `listener` for history events.
    pub fn subscribe(&mut self, listener: impl Fn(&HistoryEvent) + 'static) -> Subscription {
        self.next_listener_key += 1;
        let key = self.next_listener_key;
        self.listeners.borrow_mut().push((key, Rc::new(listener)));
        let weak = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.borrow_mut().retain(|(k, _)| *k != key);
            }
        })
    }

    fn emit(&self, operation: HistoryOperation) {
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let event = HistoryEvent::Change { operation };
        for listener in listeners {
            listener(&event);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    /// `past + current + future`, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Snapshot> {
        self.past
            .iter()
            .chain(self.current.iter())
            .chain(self.future.iter())
            .cloned()
            .collect()
    }

    /// The `index`-th entry of [`history`](Self::history), without cloning.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        let past = self.past.len();
        match index.checked_sub(past) {
            None => self.past.get(index),
            Some(0) => self.current.as_ref(),
            Some(offset) => self
                .future
                .get(offset - usize::from(self.current.is_some())),
        }
    }

    #[must_use]
    pub fn past(&self) -> &VecDeque<Snapshot> {
        &self.past
    }

    #[must_use]
    pub fn future(&self) -> &VecDeque<Snapshot> {
        &self.future
    }

    /// Position of the current snapshot in [`history`](Self::history).
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().map(|_| self.past.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.past.len() + usize::from(self.current.is_some()) + self.future.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    #[must_use]
    pub fn compression_metadata(&self) -> Option<CompressionMetadata> {
        self.compression_metadata
    }

    #[must_use]
    pub fn max_history(&self) -> usize {
        self.max_history
    }
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryManager")
            .field("max_history", &self.max_history)
            .field("past", &self.past.len())
            .field("current", &self.current.as_ref().map(|s| &s.id))
            .field("future", &self.future.len())
            .field("strategy", &self.strategy.as_ref().map(|s| s.name()))
            .finish()
    }
}
