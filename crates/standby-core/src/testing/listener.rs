//! Topology listener that records what it sees

use crate::topology::{TopologyChange, TopologyListener};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records every delta; optionally appends its label to a shared log so
/// tests can check notification order, and optionally fails
pub struct RecordingListener {
    label: String,
    log: Option<Arc<Mutex<Vec<String>>>>,
    fail: bool,
    changes: Mutex<Vec<TopologyChange>>,
}

impl RecordingListener {
    /// Listener that only records deltas
    pub fn new() -> Self {
        Self {
            label: String::new(),
            log: None,
            fail: false,
            changes: Mutex::new(Vec::new()),
        }
    }

    /// Listener that also writes `label` to `log` on every delta
    pub fn labelled(label: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label: label.into(),
            log: Some(log),
            ..Self::new()
        }
    }

    /// Like [`labelled`](Self::labelled), but every notification fails
    pub fn failing(label: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail: true,
            ..Self::labelled(label, log)
        }
    }

    /// Deltas seen so far
    pub fn changes(&self) -> Vec<TopologyChange> {
        self.changes.lock().clone()
    }
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyListener for RecordingListener {
    fn topology_changed(&self, change: &TopologyChange) -> Result<()> {
        self.changes.lock().push(change.clone());
        if let Some(log) = &self.log {
            log.lock().push(self.label.clone());
        }
        if self.fail {
            return Err(Error::invariant(format!("listener '{}' rejected the change", self.label)));
        }
        Ok(())
    }
}
