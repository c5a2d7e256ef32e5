//! Table of tracked positions.
//!
//! The book is the only mutable state shared between the message path and the
//! order monitor. It is created once and handed to both by `Arc`; there is no
//! process-wide instance.
//!
//! Each entry is behind its own [`tokio::sync::Mutex`], so all mutations of
//! one position are serialized while different positions can be scanned
//! concurrently. The table lock itself is held only for insert, lookup and
//! removal.

use std::collections::HashMap;
use std::sync::Arc;

use sigbot_core::{Position, PositionKey};
use tokio::sync::Mutex;

/// A tracked position behind its per-key lock.
pub type SharedPosition = Arc<Mutex<Position>>;

#[derive(Default)]
pub struct PositionBook {
    positions: Mutex<HashMap<PositionKey, SharedPosition>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a position. Replaces an entry with the same key.
    pub async fn insert(&self, position: Position) -> SharedPosition {
        let key = position.key().clone();
        let shared = Arc::new(Mutex::new(position));
        self.positions.lock().await.insert(key, Arc::clone(&shared));
        shared
    }

    pub async fn get(&self, key: &PositionKey) -> Option<SharedPosition> {
        self.positions.lock().await.get(key).cloned()
    }

    /// Stop tracking a position.
    pub async fn remove(&self, key: &PositionKey) -> Option<SharedPosition> {
        self.positions.lock().await.remove(key)
    }

    /// Snapshot of all entries, sorted by key.
    pub async fn entries(&self) -> Vec<(PositionKey, SharedPosition)> {
        let table = self.positions.lock().await;
        let mut entries: Vec<_> = table.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// `true` if any tracked position trades `exchange_symbol`.
    pub async fn contains_symbol(&self, exchange_symbol: &str) -> bool {
        self.positions.lock().await.keys().any(|k| k.symbol == exchange_symbol)
    }

    pub async fn len(&self) -> usize {
        self.positions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.lock().await.is_empty()
    }
}
