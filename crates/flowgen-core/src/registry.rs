//! Correlation registry
//!
//! Maps correlation tokens to the waiter of the operation that used them.
//! An entry leaves the table in the same call that settles it, so nothing
//! can be resolved twice or resolved after being rejected.

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::CorrelationId;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// Continuation handed back to the caller of an operation
pub type Responder<T> = oneshot::Sender<BridgeResult<T>>;

struct Entry<T, M> {
    responder: Responder<T>,
    meta: M,
}

/// Pending operations of one kind, keyed by correlation token
pub struct CorrelationRegistry<T, M = ()> {
    label: &'static str,
    entries: HashMap<CorrelationId, Entry<T, M>>,
}

impl<T, M> CorrelationRegistry<T, M> {
    /// Create an empty registry; `label` names the operation kind in logs
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: HashMap::new(),
        }
    }

    /// Register a pending operation.
    ///
    /// Fails and hands the responder back if the token is already pending.
    pub fn register(
        &mut self,
        id: CorrelationId,
        responder: Responder<T>,
        meta: M,
    ) -> Result<(), Responder<T>> {
        if self.entries.contains_key(&id) {
            return Err(responder);
        }
        self.entries.insert(id, Entry { responder, meta });
        Ok(())
    }

    /// Whether `id` is pending
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Mutable access to the bookkeeping attached to a pending entry
    pub fn meta_mut(&mut self, id: &CorrelationId) -> Option<&mut M> {
        self.entries.get_mut(id).map(|entry| &mut entry.meta)
    }

    /// Tokens currently pending
    pub fn ids(&self) -> impl Iterator<Item = &CorrelationId> {
        self.entries.keys()
    }

    /// Number of pending operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `id` and deliver `result` to its waiter.
    ///
    /// Returns the entry's bookkeeping, or `None` if `id` was not pending.
    pub fn settle(&mut self, id: &CorrelationId, result: BridgeResult<T>) -> Option<M> {
        let entry = self.entries.remove(id)?;
        if entry.responder.send(result).is_err() {
            debug!("{} {} settled after its caller went away", self.label, id);
        }
        Some(entry.meta)
    }

    /// Resolve `id` with `value`
    pub fn resolve(&mut self, id: &CorrelationId, value: T) -> Option<M> {
        self.settle(id, Ok(value))
    }

    /// Reject `id` with `error`
    pub fn reject(&mut self, id: &CorrelationId, error: BridgeError) -> Option<M> {
        self.settle(id, Err(error))
    }

    /// Reject every pending entry with a clone of `error`; returns how many
    pub fn reject_all(&mut self, error: &BridgeError) -> usize {
        let drained: Vec<_> = self.entries.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!("Rejecting {} {}: {}", self.label, id, error);
            let _ = entry.responder.send(Err(error.clone()));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_removes_entry() {
        let mut registry: CorrelationRegistry<u32> = CorrelationRegistry::new("chat");
        let (tx, mut rx) = oneshot::channel();
        let id = CorrelationId::from("a");
        assert!(registry.register(id.clone(), tx, ()).is_ok());
        assert!(registry.contains(&id));

        assert_eq!(registry.resolve(&id, 7), Some(()));
        assert!(registry.is_empty());
        assert_eq!(rx.try_recv().unwrap(), Ok(7));

        // Second settlement finds nothing
        assert_eq!(registry.reject(&id, BridgeError::Busy), None);
    }

    #[test]
    fn test_duplicate_token_is_refused() {
        let mut registry: CorrelationRegistry<u32> = CorrelationRegistry::new("chat");
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let id = CorrelationId::from("dup");
        assert!(registry.register(id.clone(), tx1, ()).is_ok());
        assert!(registry.register(id, tx2, ()).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_meta_is_mutable_and_returned() {
        let mut registry: CorrelationRegistry<(), u8> = CorrelationRegistry::new("run");
        let (tx, _rx) = oneshot::channel();
        let id = CorrelationId::from("r");
        registry.register(id.clone(), tx, 10).ok();

        *registry.meta_mut(&id).unwrap() += 5;
        assert_eq!(registry.resolve(&id, ()), Some(15));
    }

    #[test]
    fn test_reject_all_settles_each_once() {
        let mut registry: CorrelationRegistry<u32> = CorrelationRegistry::new("chat");
        let mut receivers = Vec::new();
        for n in 0..3 {
            let (tx, rx) = oneshot::channel();
            registry
                .register(CorrelationId::from(format!("c{n}")), tx, ())
                .ok();
            receivers.push(rx);
        }

        let error = BridgeError::transport("worker exited");
        assert_eq!(registry.reject_all(&error), 3);
        assert!(registry.is_empty());
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), Err(error.clone()));
        }
        assert_eq!(registry.reject_all(&error), 0);
    }

    #[test]
    fn test_settle_with_dropped_caller_still_removes() {
        let mut registry: CorrelationRegistry<u32> = CorrelationRegistry::new("chat");
        let (tx, rx) = oneshot::channel();
        let id = CorrelationId::from("gone");
        registry.register(id.clone(), tx, ()).ok();
        drop(rx);
        assert!(registry.resolve(&id, 1).is_some());
        assert!(registry.is_empty());
    }
}
