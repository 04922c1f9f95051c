//! Cell registry and processed-id set
//!
//! Both are owned by the manager and shared by reference; there is no
//! process-global state.

use crate::host::SurfaceId;
use crate::identity::CellId;
use crate::state::CellState;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Registry slot of one mounted cell
#[derive(Debug)]
pub struct CellEntry {
    state: Mutex<CellState>,
    run_gate: Arc<tokio::sync::Mutex<()>>,
    detached: AtomicBool,
}

impl CellEntry {
    fn new(state: CellState) -> Self {
        Self {
            state: Mutex::new(state),
            run_gate: Arc::new(tokio::sync::Mutex::new(())),
            detached: AtomicBool::new(false),
        }
    }

    /// Read or update the state under the lock
    pub fn with<R>(&self, f: impl FnOnce(&mut CellState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> CellState {
        self.state.lock().clone()
    }

    /// Take the per-cell run gate if no run holds it
    #[must_use]
    pub fn try_run_gate(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.run_gate).try_lock_owned().ok()
    }

    /// Wait for the per-cell run gate
    pub async fn run_gate(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.run_gate).lock_owned().await
    }

    /// Cell was unmounted; pending results are dropped
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

/// Ids whose first-render side effects were dispatched
#[derive(Debug, Default)]
pub struct ProcessedIds {
    ids: DashSet<CellId>,
}

impl ProcessedIds {
    /// Add `id`; `true` only for the caller that added it
    pub fn claim(&self, id: CellId) -> bool {
        self.ids.insert(id)
    }

    /// Check if an id was processed
    #[must_use]
    pub fn contains(&self, id: &CellId) -> bool {
        self.ids.contains(id)
    }

    /// Number of processed ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// No id processed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Mapping from cell identity to cell state
#[derive(Debug, Default)]
pub struct CellRegistry {
    cells: DashMap<CellId, Arc<CellEntry>>,
    processed: ProcessedIds,
}

impl CellRegistry {
    /// Create new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a mounted cell
    #[must_use]
    pub fn get(&self, id: &CellId) -> Option<Arc<CellEntry>> {
        self.cells.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Insert unless mounted; the flag is `true` when `state` was inserted
    pub fn insert_if_absent(&self, state: CellState) -> (Arc<CellEntry>, bool) {
        match self.cells.entry(state.id) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(CellEntry::new(state));
                vacant.insert(Arc::clone(&entry));
                (entry, true)
            }
        }
    }

    /// Unmount a cell
    pub fn remove(&self, id: &CellId) -> Option<Arc<CellEntry>> {
        let (_, entry) = self.cells.remove(id)?;
        entry.detached.store(true, Ordering::SeqCst);
        Some(entry)
    }

    /// State snapshot of a mounted cell
    #[must_use]
    pub fn snapshot(&self, id: &CellId) -> Option<CellState> {
        self.get(id).map(|entry| entry.snapshot())
    }

    /// Cells mounted on `surface`, in document order
    #[must_use]
    pub fn cells_on(&self, surface: &SurfaceId) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self
            .cells
            .iter()
            .filter(|e| e.value().with(|s| &s.surface == surface))
            .map(|e| *e.key())
            .collect();
        ids.sort_by_key(CellId::position);
        ids
    }

    /// All mounted ids, in document order
    #[must_use]
    pub fn ids(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self.cells.iter().map(|e| *e.key()).collect();
        ids.sort_by_key(CellId::position);
        ids
    }

    /// Number of mounted cells
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// No cell mounted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Processed-id set
    #[must_use]
    pub fn processed(&self) -> &ProcessedIds {
        &self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identify;
    use std::thread;

    fn state(text: &str, pos: usize, surface: &str) -> CellState {
        CellState::new(identify(text, pos), "python".into(), surface.into(), text)
    }

    #[test]
    fn insert_once() {
        let registry = CellRegistry::new();
        let (_, inserted) = registry.insert_if_absent(state("a", 0, "s"));
        assert!(inserted);
        let (entry, inserted) = registry.insert_if_absent(state("a", 0, "s"));
        assert!(!inserted);
        assert_eq!(entry.snapshot().source_text, "a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn claim_is_exclusive_across_threads() {
        let registry = Arc::new(CellRegistry::new());
        let id = identify("x", 0);
        let winners: usize = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || usize::from(registry.processed().claim(id)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
        assert!(registry.processed().contains(&id));
    }

    #[test]
    fn cells_on_surface_in_order() {
        let registry = CellRegistry::new();
        registry.insert_if_absent(state("b", 2, "s1"));
        registry.insert_if_absent(state("a", 0, "s1"));
        registry.insert_if_absent(state("c", 1, "s2"));
        let ids = registry.cells_on(&"s1".into());
        assert_eq!(ids.iter().map(CellId::position).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn remove_detaches() {
        let registry = CellRegistry::new();
        let (entry, _) = registry.insert_if_absent(state("a", 0, "s"));
        let id = entry.snapshot().id;
        assert!(!entry.is_detached());
        registry.remove(&id);
        assert!(entry.is_detached());
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn run_gate_is_exclusive() {
        let registry = CellRegistry::new();
        let (entry, _) = registry.insert_if_absent(state("a", 0, "s"));
        let guard = entry.try_run_gate();
        assert!(guard.is_some());
        assert!(entry.try_run_gate().is_none());
        drop(guard);
        assert!(entry.try_run_gate().is_some());
    }
}
