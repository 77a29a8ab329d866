// src/batch/registry.rs

//! In-memory registry of batches, keyed by id.
//!
//! Lock order: the registry lock may be held while a batch's state lock is
//! taken, never the other way round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::batch::orchestrator::BatchHandle;
use crate::errors::{CodeactError, Result};

#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: Mutex<HashMap<String, Arc<BatchHandle>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` unless its id is taken or `max_active` unterminated
    /// batches are already registered.
    pub fn register(&self, handle: Arc<BatchHandle>, max_active: usize) -> Result<()> {
        let mut batches = self.batches.lock();
        if batches.contains_key(handle.id()) {
            return Err(CodeactError::DuplicateBatch(handle.id().to_string()));
        }
        let active = batches.values().filter(|b| !b.is_terminal()).count();
        if active >= max_active {
            return Err(CodeactError::Validation(format!(
                "Too many concurrent batches (limit {max_active})"
            )));
        }
        batches.insert(handle.id().to_string(), handle);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<BatchHandle>> {
        self.batches.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<BatchHandle>> {
        self.batches.lock().get(id).cloned()
    }

    /// Snapshot of the registered ids.
    pub fn ids(&self) -> Vec<String> {
        self.batches.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    /// Registered batches that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.batches
            .lock()
            .values()
            .filter(|b| !b.is_terminal())
            .count()
    }

    pub fn clear(&self) {
        self.batches.lock().clear();
    }

    /// Evict terminal batches completed more than `max_age` ago, then the
    /// oldest terminal batches while more than `max_history` remain.
    ///
    /// Returns the evicted ids.
    pub fn sweep(&self, now: DateTime<Utc>, max_age: Duration, max_history: usize) -> Vec<String> {
        let mut batches = self.batches.lock();
        let mut evicted = Vec::new();

        let expired: Vec<String> = batches
            .iter()
            .filter_map(|(id, handle)| {
                let completed = handle.completed_at()?;
                let age = now.signed_duration_since(completed).to_std().unwrap_or_default();
                (age > max_age).then(|| id.clone())
            })
            .collect();
        for id in expired {
            batches.remove(&id);
            evicted.push(id);
        }

        if batches.len() > max_history {
            let mut terminal: Vec<(DateTime<Utc>, String)> = batches
                .iter()
                .filter(|(_, handle)| handle.is_terminal())
                .map(|(id, handle)| (handle.created_at(), id.clone()))
                .collect();
            terminal.sort();

            let excess = batches.len() - max_history;
            for (_, id) in terminal.into_iter().take(excess) {
                batches.remove(&id);
                evicted.push(id);
            }
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), remaining = batches.len(), "evicted batches");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::state::LoopOutcome;
    use std::path::PathBuf;

    fn handle(id: &str, created: DateTime<Utc>) -> Arc<BatchHandle> {
        Arc::new(BatchHandle::new(
            id.to_string(),
            Vec::new(),
            PathBuf::from("/ws"),
            PathBuf::from("/ws"),
            created,
        ))
    }

    fn finish(h: &BatchHandle, at: DateTime<Utc>) {
        h.finalize(LoopOutcome::Completed, at);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let reg = BatchRegistry::new();
        let now = Utc::now();
        reg.register(handle("a", now), 10).unwrap();
        let err = reg.register(handle("a", now), 10).unwrap_err();
        assert!(matches!(err, CodeactError::DuplicateBatch(id) if id == "a"));
    }

    #[test]
    fn concurrency_limit_counts_only_unterminated_batches() {
        let reg = BatchRegistry::new();
        let now = Utc::now();
        let first = handle("a", now);
        reg.register(first.clone(), 1).unwrap();
        assert!(reg.register(handle("b", now), 1).is_err());

        finish(&first, now);
        reg.register(handle("b", now), 1).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn sweep_evicts_old_terminal_batches_only() {
        let reg = BatchRegistry::new();
        let now = Utc::now();
        let old = handle("old", now - chrono::Duration::hours(3));
        let recent = handle("recent", now);
        let running = handle("running", now - chrono::Duration::hours(5));
        finish(&old, now - chrono::Duration::hours(2));
        finish(&recent, now);
        for h in [&old, &recent, &running] {
            reg.register(h.clone(), 10).unwrap();
        }

        let evicted = reg.sweep(now, Duration::from_secs(3600), 100);

        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(reg.get("running").is_some());
        assert!(reg.get("recent").is_some());
    }

    #[test]
    fn sweep_caps_history_by_evicting_oldest_terminal() {
        let reg = BatchRegistry::new();
        let now = Utc::now();
        for i in 0..4 {
            let h = handle(&format!("b{i}"), now + chrono::Duration::seconds(i));
            finish(&h, now);
            reg.register(h, 10).unwrap();
        }
        reg.register(handle("live", now - chrono::Duration::days(1)), 10).unwrap();

        let mut evicted = reg.sweep(now, Duration::from_secs(3600), 2);
        evicted.sort();

        assert_eq!(evicted, vec!["b0", "b1", "b2"]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get("live").is_some());
        assert!(reg.get("b3").is_some());
    }
}
