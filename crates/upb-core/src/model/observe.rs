// ── Change observers ──
//
// Per-entity callback lists. Callbacks fire synchronously, in the order
// they were added, and only when a value actually changed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use super::link::LinkChange;

/// One attribute that changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Status { old: Option<u8>, new: u8 },
    LastChange(LinkChange),
}

/// Token returned by `add_callback`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub type Callback<E> = Arc<dyn Fn(&E, &[Change]) + Send + Sync>;

pub(crate) struct Observers<E> {
    next_id: AtomicU64,
    callbacks: ArcSwap<Vec<(CallbackId, Callback<E>)>>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.callbacks.load().len())
            .finish()
    }
}

impl<E> Observers<E> {
    pub(crate) fn add(&self, callback: Callback<E>) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push((id, Arc::clone(&callback)));
            next
        });
        id
    }

    pub(crate) fn remove(&self, id: CallbackId) -> bool {
        let mut removed = false;
        self.callbacks.rcu(|current| {
            let next: Vec<_> = current.iter().filter(|(cid, _)| *cid != id).cloned().collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    pub(crate) fn notify(&self, entity: &E, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        for (_, callback) in self.callbacks.load().iter() {
            callback(entity, changes);
        }
    }
}
