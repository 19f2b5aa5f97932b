//! The set of actors under the traffic manager's control.

use crate::actor::ActorHandle;
use crate::ActorId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, versioned list of registered actors.
///
/// The version increments whenever an actor is added or removed, so readers
/// can skip copying the list when nothing has changed.
#[derive(Default)]
pub struct AtomicActorSet {
    actors: Mutex<Vec<ActorHandle>>,
    state: AtomicU64,
}

impl AtomicActorSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers actors, ignoring any whose ID is already registered.
    pub fn insert(&self, actors: impl IntoIterator<Item = ActorHandle>) {
        let mut list = self.actors.lock();
        let mut changed = false;
        for actor in actors {
            if list.iter().all(|a| a.id() != actor.id()) {
                list.push(actor);
                changed = true;
            }
        }
        if changed {
            self.state.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Deregisters actors by ID. Returns the number actually removed.
    pub fn remove(&self, ids: &[ActorId]) -> usize {
        let mut list = self.actors.lock();
        let before = list.len();
        list.retain(|a| !ids.contains(&a.id()));
        let removed = before - list.len();
        if removed > 0 {
            self.state.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Whether an actor with the given ID is registered.
    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.lock().iter().any(|a| a.id() == id)
    }

    /// A snapshot of the registered actors, in registration order.
    pub fn list(&self) -> Vec<ActorHandle> {
        self.actors.lock().clone()
    }

    /// The number of registered actors.
    pub fn len(&self) -> usize {
        self.actors.lock().len()
    }

    /// Whether no actors are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current version of the set.
    pub fn state(&self) -> u64 {
        self.state.load(Ordering::Acquire)
    }
}
