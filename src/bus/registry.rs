use std::sync::Arc;

use dashmap::DashMap;

use super::{same_listener, EventKind, Listener, ListenerId};

/// One registered listener together with its handle.
pub struct ListenerEntry<P> {
    pub id: ListenerId,
    pub listener: Arc<dyn Listener<P>>,
}

impl<P> Clone for ListenerEntry<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            listener: Arc::clone(&self.listener),
        }
    }
}

/// Per-kind listener sets.
///
/// Readers take a snapshot (a cloned `Vec` of `Arc`s) under the shard lock,
/// so dispatch iterates a stable list while other threads register or
/// remove listeners. Empty sets are removed.
pub struct ListenerRegistry<P> {
    by_kind: DashMap<EventKind, Vec<ListenerEntry<P>>>,
}

impl<P> ListenerRegistry<P> {
    pub fn new() -> Self {
        Self {
            by_kind: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        kind: EventKind,
        listener: Arc<dyn Listener<P>>,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.by_kind
            .entry(kind)
            .or_default()
            .push(ListenerEntry { id, listener });
        id
    }

    /// Removes the registration with the given handle.
    pub fn remove(
        &self,
        kind: EventKind,
        id: ListenerId,
    ) -> bool {
        self.remove_where(kind, |e| e.id == id)
    }

    /// Removes every registration of this listener instance for `kind`.
    pub fn remove_listener(
        &self,
        kind: EventKind,
        listener: &Arc<dyn Listener<P>>,
    ) -> bool {
        self.remove_where(kind, |e| same_listener(&e.listener, listener))
    }

    fn remove_where(
        &self,
        kind: EventKind,
        pred: impl Fn(&ListenerEntry<P>) -> bool,
    ) -> bool {
        let removed = match self.by_kind.get_mut(&kind) {
            Some(mut set) => {
                let before = set.len();
                set.retain(|e| !pred(e));
                before != set.len()
            }
            None => false,
        };
        if removed {
            self.by_kind.remove_if(&kind, |_, set| set.is_empty());
        }
        removed
    }

    /// Listeners registered for `kind` at this instant.
    pub fn snapshot(
        &self,
        kind: EventKind,
    ) -> Vec<ListenerEntry<P>> {
        self.by_kind
            .get(&kind)
            .map(|set| set.value().clone())
            .unwrap_or_default()
    }

    pub fn count(
        &self,
        kind: EventKind,
    ) -> usize {
        self.by_kind.get(&kind).map(|set| set.len()).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.by_kind.iter().map(|set| set.len()).sum()
    }

    /// Kinds that currently have at least one listener.
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.by_kind.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }
}

impl<P> Default for ListenerRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
