#![forbid(unsafe_code)]

//! Writing snapshots back into a store.
//!
//! Only primitive atoms are written; derived atoms recompute from them. Two
//! entry points with different failure contracts:
//!
//! - [`StateRestorer::restore_from_snapshot`] is best effort. Bad entries are
//!   logged and skipped, and the call reports only whether the snapshot was
//!   usable at all.
//! - [`StateRestorer::restore_transactional`] decodes everything first and
//!   writes nothing if any entry fails.

use rewind_runtime::{Atom, AtomId, AtomKind, Store};
use rewind_value::{Value, ValueSerializer};
use tracing::{debug, warn};

use crate::error::{AtomRestoreFailure, RestorationError};
use crate::snapshot::{SNAPSHOT_FORMAT_VERSION, Snapshot, SnapshotEntry};

/// Outcome of a successful transactional restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Primitive atoms written.
    pub restored: Vec<String>,
    /// Derived entries left to recompute.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StateRestorer {
    store: Store,
    serializer: ValueSerializer,
}

impl StateRestorer {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            serializer: ValueSerializer::new(),
        }
    }

    /// Structural checks: non-empty id and version, and an atom count that
    /// matches the state.
    pub fn validate(&self, snapshot: &Snapshot) -> Result<(), RestorationError> {
        if snapshot.id.is_empty() {
            return Err(RestorationError::invalid("missing id"));
        }
        if snapshot.metadata.version.is_empty() {
            return Err(RestorationError::invalid("missing version"));
        }
        if snapshot.metadata.atom_count != snapshot.state.len() {
            return Err(RestorationError::invalid(format!(
                "atomCount {} does not match {} state entries",
                snapshot.metadata.atom_count,
                snapshot.state.len()
            )));
        }
        Ok(())
    }

    /// Every format version is currently readable; a mismatch is only logged.
    pub fn handle_version_mismatch(&self, snapshot: &Snapshot) -> bool {
        if snapshot.metadata.version != SNAPSHOT_FORMAT_VERSION {
            warn!(
                snapshot = %snapshot.id,
                found = %snapshot.metadata.version,
                expected = SNAPSHOT_FORMAT_VERSION,
                "snapshot version mismatch, restoring anyway"
            );
        }
        true
    }

    fn resolve(&self, key: &str, entry: &SnapshotEntry) -> Result<(Atom, Value), String> {
        let id: AtomId = key.parse().map_err(|err| format!("{err}"))?;
        let atom = self
            .store
            .registry()
            .get(id)
            .ok_or_else(|| format!("unknown atom {key}"))?;
        let value = self
            .serializer
            .deserialize(&entry.value)
            .map_err(|err| err.to_string())?;
        Ok((atom, value))
    }

    /// Best-effort restore. Returns `false` only for unusable snapshots.
    pub fn restore_from_snapshot(&self, snapshot: &Snapshot) -> bool {
        if let Err(err) = self.validate(snapshot) {
            warn!(snapshot = %snapshot.id, error = %err, "snapshot rejected");
            return false;
        }
        if !self.handle_version_mismatch(snapshot) {
            return false;
        }

        let mut restored = 0usize;
        for (key, entry) in &snapshot.state {
            if entry.kind.is_derived() {
                continue;
            }
            match self.resolve(key, entry) {
                Ok((atom, _)) if atom.kind().is_derived() => {
                    warn!(atom = %key, kind = %atom.kind(), "snapshot entry targets a derived atom");
                }
                Ok((atom, value)) => match self.store.restore_value(&atom, value) {
                    Ok(()) => restored += 1,
                    Err(err) => warn!(atom = %key, error = %err, "atom restore failed"),
                },
                Err(reason) => warn!(atom = %key, %reason, "atom skipped during restore"),
            }
        }
        self.store.invalidate_derived();
        debug!(snapshot = %snapshot.id, restored, "snapshot restored");
        true
    }

    /// Parse the persisted schema, then [`restore_from_snapshot`].
    ///
    /// [`restore_from_snapshot`]: Self::restore_from_snapshot
    pub fn restore_from_json(&self, json: &str) -> bool {
        match Snapshot::from_json(json) {
            Ok(snapshot) => self.restore_from_snapshot(&snapshot),
            Err(err) => {
                warn!(error = %err, "snapshot json rejected");
                false
            }
        }
    }

    /// All-or-nothing restore.
    pub fn restore_transactional(&self, snapshot: &Snapshot) -> Result<RestoreReport, RestorationError> {
        self.validate(snapshot)?;
        if !self.handle_version_mismatch(snapshot) {
            return Err(RestorationError::invalid("incompatible version"));
        }
        if self.store.is_destroyed() {
            return Err(RestorationError::invalid("store destroyed"));
        }

        let mut report = RestoreReport::default();
        let mut writes = Vec::new();
        let mut failures = Vec::new();
        for (key, entry) in &snapshot.state {
            if entry.kind.is_derived() {
                report.skipped.push(key.clone());
                continue;
            }
            match self.resolve(key, entry) {
                Ok((atom, _)) if atom.kind() == AtomKind::Computed => {
                    failures.push(AtomRestoreFailure {
                        atom: key.clone(),
                        reason: "Cannot set value of computed atom".into(),
                    });
                }
                Ok((atom, value)) => writes.push((key.clone(), atom, value)),
                Err(reason) => failures.push(AtomRestoreFailure {
                    atom: key.clone(),
                    reason,
                }),
            }
        }
        if !failures.is_empty() {
            warn!(snapshot = %snapshot.id, failures = failures.len(), "transactional restore aborted");
            return Err(RestorationError::Atoms { failures });
        }

        for (key, atom, value) in writes {
            self.store
                .restore_value(&atom, value)
                .map_err(|err| RestorationError::Atoms {
                    failures: vec![AtomRestoreFailure {
                        atom: key.clone(),
                        reason: err.to_string(),
                    }],
                })?;
            report.restored.push(key);
        }
        self.store.invalidate_derived();
        debug!(snapshot = %snapshot.id, restored = report.restored.len(), "transactional restore complete");
        Ok(report)
    }
}
