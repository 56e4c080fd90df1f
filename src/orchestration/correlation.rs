//! # Correlation Store
//!
//! Maps a request's correlation id to its pending-completion handle: a
//! one-shot signal plus a result slot. Synchronous-style channel adapters
//! block on the handle until the responder stage resolves the entry.
//!
//! Resolution is exactly-once by construction: the one-shot sender is
//! consumed on the first `resolve` and a tombstone remains so a second
//! attempt is reported as an error instead of silently dropped. Entries are
//! removed on consumption (or wait timeout), so the store never accumulates.
//!
//! ```rust
//! use parley_core::orchestration::CorrelationStore;
//! use parley_core::request::{ResolvedReply, StageResult};
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let store = CorrelationStore::new();
//! let request_id = Uuid::new_v4();
//! let handle = store.create(request_id).unwrap();
//!
//! store
//!     .resolve(
//!         request_id,
//!         ResolvedReply {
//!             request_id,
//!             result: StageResult::success(serde_json::json!({"text": "hi"})),
//!         },
//!     )
//!     .unwrap();
//!
//! let reply = handle.wait(None).await.unwrap();
//! assert!(reply.result.is_success());
//! # });
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::request::ResolvedReply;

#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error("Correlation entry already exists for request {request_id}")]
    DuplicateEntry { request_id: Uuid },

    #[error("No correlation entry for request {request_id}")]
    Unknown { request_id: Uuid },

    #[error("Correlation entry for request {request_id} was already resolved")]
    AlreadyResolved { request_id: Uuid },

    #[error("Waiter for request {request_id} went away before resolution")]
    WaiterGone { request_id: Uuid },

    #[error("Wait for request {request_id} timed out")]
    Timeout { request_id: Uuid },
}

enum EntrySlot {
    Pending(oneshot::Sender<ResolvedReply>),
    Resolved,
}

/// Shared store of pending completion handles, keyed by correlation id
#[derive(Clone, Default)]
pub struct CorrelationStore {
    entries: Arc<DashMap<Uuid, EntrySlot>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending entry for a request.
    ///
    /// A second `create` for the same id is an integration error, not an
    /// overwrite: the original waiter must never be orphaned.
    pub fn create(&self, request_id: Uuid) -> Result<CompletionHandle, CorrelationError> {
        match self.entries.entry(request_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CorrelationError::DuplicateEntry { request_id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(EntrySlot::Pending(tx));
                Ok(CompletionHandle {
                    request_id,
                    receiver: rx,
                    entries: self.entries.clone(),
                })
            }
        }
    }

    /// Resolve a pending entry exactly once.
    ///
    /// Resolving an unknown or already-resolved id is an error surfaced to
    /// the caller.
    pub fn resolve(
        &self,
        request_id: Uuid,
        reply: ResolvedReply,
    ) -> Result<(), CorrelationError> {
        let Some(mut entry) = self.entries.get_mut(&request_id) else {
            return Err(CorrelationError::Unknown { request_id });
        };

        let slot = std::mem::replace(entry.value_mut(), EntrySlot::Resolved);
        drop(entry);

        match slot {
            EntrySlot::Resolved => Err(CorrelationError::AlreadyResolved { request_id }),
            EntrySlot::Pending(sender) => {
                if sender.send(reply).is_err() {
                    // The waiter timed out and dropped its receiver; remove
                    // the tombstone so the slot does not linger
                    self.entries.remove(&request_id);
                    return Err(CorrelationError::WaiterGone { request_id });
                }
                debug!(%request_id, "Correlation entry resolved");
                Ok(())
            }
        }
    }

    /// Drop an entry without resolving it (intake error paths only)
    pub(crate) fn discard(&self, request_id: Uuid) {
        self.entries.remove(&request_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One waiter's handle on a pending correlation entry.
///
/// Consuming the handle removes the entry from the store on every exit path,
/// so a consumed entry cannot be consumed twice.
pub struct CompletionHandle {
    request_id: Uuid,
    receiver: oneshot::Receiver<ResolvedReply>,
    entries: Arc<DashMap<Uuid, EntrySlot>>,
}

impl CompletionHandle {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Suspend until the entry resolves, then remove and return it.
    ///
    /// With a timeout, the entry is released rather than left to block
    /// forever; a late `resolve` then reports `WaiterGone`.
    pub async fn wait(
        self,
        timeout: Option<Duration>,
    ) -> Result<ResolvedReply, CorrelationError> {
        let request_id = self.request_id;
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.receiver).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    self.entries.remove(&request_id);
                    return Err(CorrelationError::Timeout { request_id });
                }
            },
            None => self.receiver.await,
        };

        self.entries.remove(&request_id);
        outcome.map_err(|_| CorrelationError::Unknown { request_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StageResult;

    fn reply(request_id: Uuid) -> ResolvedReply {
        ResolvedReply {
            request_id,
            result: StageResult::success(serde_json::json!("hi")),
        }
    }

    #[tokio::test]
    async fn test_resolve_then_wait() {
        let store = CorrelationStore::new();
        let id = Uuid::new_v4();
        let handle = store.create(id).unwrap();

        store.resolve(id, reply(id)).unwrap();
        let resolved = handle.wait(None).await.unwrap();
        assert_eq!(resolved.request_id, id);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = CorrelationStore::new();
        let id = Uuid::new_v4();
        let _handle = store.create(id).unwrap();
        assert!(matches!(
            store.create(id),
            Err(CorrelationError::DuplicateEntry { .. })
        ));
    }

    #[tokio::test]
    async fn test_double_resolution_is_an_error() {
        let store = CorrelationStore::new();
        let id = Uuid::new_v4();
        let _handle = store.create(id).unwrap();

        store.resolve(id, reply(id)).unwrap();
        assert!(matches!(
            store.resolve(id, reply(id)),
            Err(CorrelationError::AlreadyResolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_an_error() {
        let store = CorrelationStore::new();
        assert!(matches!(
            store.resolve(Uuid::new_v4(), reply(Uuid::new_v4())),
            Err(CorrelationError::Unknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_timeout_releases_entry() {
        let store = CorrelationStore::new();
        let id = Uuid::new_v4();
        let handle = store.create(id).unwrap();

        let result = handle.wait(Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(CorrelationError::Timeout { .. })));
        assert!(store.is_empty());

        // A late resolve finds no entry left to resolve
        assert!(matches!(
            store.resolve(id, reply(id)),
            Err(CorrelationError::Unknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_exactly_once() {
        let store = CorrelationStore::new();
        let id = Uuid::new_v4();
        let handle = store.create(id).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(
                async move { store.resolve(id, reply(id)).is_ok() },
            ));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert!(handle.wait(None).await.is_ok());
    }
}
