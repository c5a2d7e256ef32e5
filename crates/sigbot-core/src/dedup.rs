//! Message redelivery detection.
//!
//! The messaging collaborator may deliver the same message more than once
//! (reconnects, edits, replays). [`MessageDedup`] remembers the IDs it has
//! seen so that only the *first* delivery of each message is processed.
//!
//! The window is bounded: once `capacity` IDs are stored, the oldest one is
//! forgotten first.

use std::collections::VecDeque;

use ahash::AHashSet;

/// Bounded first-seen filter over message IDs.
///
/// # Thread safety
///
/// Not thread-safe. Owners wrap it in a mutex when it is shared.
pub struct MessageDedup {
    seen: AHashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MessageDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: AHashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Check whether `message_id` is new.
    ///
    /// Returns `true` on the first delivery (and records the ID), `false` for
    /// a redelivery.
    pub fn check_and_insert(&mut self, message_id: &str) -> bool {
        if self.seen.contains(message_id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(message_id.to_string());
        self.order.push_back(message_id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new(4096)
    }
}
