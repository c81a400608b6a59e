// Author: Jacques Murray

//! The offline operation queue.
//!
//! Operations that could not be sent while offline are stored as plain
//! [`Operation`] descriptors in a [`Storage`] and replayed, in enqueue order,
//! once connectivity returns. The persisted list is the only durable state
//! in the crate; every change to it is a full read-modify-write under a lock.

use crate::config::DispatchOptions;
use crate::error::{DispatchError, QueueError};
use crate::storage::Storage;
use crate::transport::{Operation, Response};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Success,
    Error,
}

/// A persisted, replayable operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub operation: Operation,
    pub options: DispatchOptions,
    /// Milliseconds since the Unix epoch.
    pub queued_at: u64,
    pub status: QueueStatus,
}

/// Outcome of replaying one queued operation.
#[derive(Debug)]
pub struct ReplayResult {
    pub id: String,
    pub status: QueueStatus,
    pub outcome: Result<Response, DispatchError>,
}

/// Executes replayed operations; implemented by [`crate::ResilientClient`].
pub trait OperationExecutor: Send + Sync {
    fn execute(
        &self,
        operation: Operation,
        options: DispatchOptions,
    ) -> BoxFuture<'_, Result<Response, DispatchError>>;
}

pub struct OfflineQueue {
    storage: Arc<dyn Storage>,
    key: String,
    // Serializes read-modify-write cycles on the persisted list.
    write_lock: Mutex<()>,
    // One replay pass at a time.
    pass_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            write_lock: Mutex::new(()),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Persists `operation` at the end of the queue and returns its id.
    pub fn enqueue(&self, operation: Operation, options: DispatchOptions) -> Result<String, QueueError> {
        let id = format!("op_{}", uuid::Uuid::new_v4().simple());
        let entry = QueuedOperation {
            id: id.clone(),
            operation,
            options: DispatchOptions {
                retry_condition: None,
                ..options
            },
            queued_at: now_millis(),
            status: QueueStatus::Queued,
        };

        self.modify(|list| list.push(entry))?;

        #[cfg(feature = "logging")]
        log::info!("Queued operation {} for replay when back online", id);
        Ok(id)
    }

    /// Everything currently persisted, in enqueue order.
    pub fn list(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        self.read()
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.read()?.is_empty())
    }

    /// Drops every queued operation without running it.
    pub fn clear(&self) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.storage.remove(&self.key)?;
        Ok(())
    }

    /// Replays every queued operation once, in order.
    ///
    /// A failing item does not stop the pass. Every item that was queued
    /// when the pass began is removed afterwards, whatever its outcome;
    /// failed items are reported, and re-queueing them is up to the caller.
    pub async fn process_queued(
        &self,
        executor: &dyn OperationExecutor,
    ) -> Result<Vec<ReplayResult>, QueueError> {
        let _pass = self.pass_lock.lock().await;

        let snapshot = self.read()?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        #[cfg(feature = "logging")]
        log::info!("Replaying {} queued operation(s)", snapshot.len());

        let mut results = Vec::with_capacity(snapshot.len());
        for entry in &snapshot {
            let outcome = executor
                .execute(entry.operation.clone(), entry.options.clone())
                .await;
            let status = if outcome.is_ok() {
                QueueStatus::Success
            } else {
                QueueStatus::Error
            };

            #[cfg(feature = "logging")]
            if let Err(e) = &outcome {
                log::warn!("Queued operation {} failed on replay: {}", entry.id, e);
            }

            results.push(ReplayResult {
                id: entry.id.clone(),
                status,
                outcome,
            });
        }

        let processed: HashSet<&str> = snapshot.iter().map(|e| e.id.as_str()).collect();
        self.modify(|list| list.retain(|e| !processed.contains(e.id.as_str())))?;

        Ok(results)
    }

    fn read(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        match self.storage.get(&self.key)? {
            Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
            _ => Ok(Vec::new()),
        }
    }

    fn modify<F>(&self, mutate: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Vec<QueuedOperation>),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut list = self.read()?;
        mutate(&mut list);
        if list.is_empty() {
            self.storage.remove(&self.key)?;
        } else {
            self.storage.set(&self.key, &serde_json::to_string(&list)?)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue").field("key", &self.key).finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassifiedError, ErrorCategory};
    use crate::storage::MemoryStorage;
    use futures::FutureExt;
    use serde_json::json;

    /// Records executed operation names; fails those whose name starts with "bad".
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl OperationExecutor for Recorder {
        fn execute(
            &self,
            operation: Operation,
            _options: DispatchOptions,
        ) -> BoxFuture<'_, Result<Response, DispatchError>> {
            self.seen.lock().unwrap().push(operation.name.clone());
            async move {
                if operation.name.starts_with("bad") {
                    Err(ClassifiedError::from_category(ErrorCategory::Validation, "400").into())
                } else {
                    Ok(Response::ok(json!({"ok": true})))
                }
            }
            .boxed()
        }
    }

    fn queue(storage: Arc<dyn Storage>) -> OfflineQueue {
        OfflineQueue::new(storage, "offline_operations")
    }

    #[tokio::test]
    async fn replays_in_order_and_empties() {
        let q = queue(Arc::new(MemoryStorage::new()));
        let first = q.enqueue(Operation::post("a", "/a", json!(1)), DispatchOptions::default()).unwrap();
        let second = q.enqueue(Operation::post("bad_b", "/b", json!(2)), DispatchOptions::default()).unwrap();
        let third = q.enqueue(Operation::delete("c", "/c"), DispatchOptions::default()).unwrap();
        assert_eq!(q.len().unwrap(), 3);

        let recorder = Recorder::default();
        let results = q.process_queued(&recorder).await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "bad_b", "c"]);
        let ids: Vec<_> = results.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![first, second, third]);
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![QueueStatus::Success, QueueStatus::Error, QueueStatus::Success]);
        assert!(q.is_empty().unwrap());
    }

    #[tokio::test]
    async fn survives_restart() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        queue(storage.clone())
            .enqueue(Operation::put("save", "/campaigns/1", json!({"name": "Spring"})), DispatchOptions::default())
            .unwrap();

        // A fresh queue over the same storage stands in for a new process.
        let restarted = queue(storage.clone());
        let listed = restarted.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, QueueStatus::Queued);
        assert_eq!(listed[0].operation.body, Some(json!({"name": "Spring"})));

        let recorder = Recorder::default();
        restarted.process_queued(&recorder).await.unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        assert_eq!(storage.get("offline_operations").unwrap(), None);
    }

    /// Enqueues one follow-up write into the queue it is replaying.
    struct Enqueuer {
        queue: Arc<OfflineQueue>,
        done: std::sync::atomic::AtomicBool,
    }

    impl OperationExecutor for Enqueuer {
        fn execute(
            &self,
            _operation: Operation,
            _options: DispatchOptions,
        ) -> BoxFuture<'_, Result<Response, DispatchError>> {
            if !self.done.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.queue
                    .enqueue(Operation::post("late", "/late", json!(3)), DispatchOptions::default())
                    .unwrap();
            }
            async { Ok(Response::ok(json!({"ok": true}))) }.boxed()
        }
    }

    #[tokio::test]
    async fn enqueue_during_pass_survives() {
        let q = Arc::new(queue(Arc::new(MemoryStorage::new())));
        let first = q.enqueue(Operation::post("a", "/a", json!(1)), DispatchOptions::default()).unwrap();
        let second = q.enqueue(Operation::post("b", "/b", json!(2)), DispatchOptions::default()).unwrap();

        let executor = Enqueuer {
            queue: q.clone(),
            done: std::sync::atomic::AtomicBool::new(false),
        };
        let results = q.process_queued(&executor).await.unwrap();
        assert_eq!(results.len(), 2);

        let remaining = q.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation.name, "late");
        assert!(remaining.iter().all(|e| e.id != first && e.id != second));
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let q = queue(Arc::new(MemoryStorage::new()));
        let recorder = Recorder::default();
        assert!(q.process_queued(&recorder).await.unwrap().is_empty());
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let q = queue(Arc::new(MemoryStorage::new()));
        q.enqueue(Operation::delete("x", "/x"), DispatchOptions::default()).unwrap();
        q.clear().unwrap();
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn corrupt_storage_is_reported() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("offline_operations", "not json").unwrap();
        let q = queue(storage);
        assert!(matches!(q.list(), Err(QueueError::Serialization(_))));
    }
}
