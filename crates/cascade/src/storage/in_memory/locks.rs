//! Object-level write locks for in-memory transactions.
//!
//! Locks are all-or-nothing per call: a transaction either takes every
//! requested object or none of them, so two batches can never deadlock
//! holding half of each other's objects.

use crate::domain::ObjectRef;
use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Identifier of a lock holder.
pub(crate) type TxId = u64;

/// Table of held object locks.
///
/// Uses a std mutex so locks can be released from `Drop`.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    held: Mutex<HashMap<ObjectRef, TxId>>,
    released: Notify,
}

impl LockTable {
    /// Take every lock at once, or report the first object held elsewhere.
    pub(super) fn try_acquire(&self, tx: TxId, objects: &[ObjectRef]) -> Result<(), ObjectRef> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(blocked) = objects
            .iter()
            .find(|object| held.get(object).is_some_and(|holder| *holder != tx))
        {
            return Err(*blocked);
        }

        for object in objects {
            held.insert(*object, tx);
        }
        Ok(())
    }

    /// Take every lock, waiting until `wait` has elapsed.
    pub(super) async fn acquire(
        &self,
        tx: TxId,
        objects: &[ObjectRef],
        wait: Duration,
    ) -> StoreResult<()> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for wake-ups before checking, so a release between
            // the check and the await is not missed.
            let mut notified = pin!(self.released.notified());
            notified.as_mut().enable();

            let blocked = match self.try_acquire(tx, objects) {
                Ok(()) => return Ok(()),
                Err(blocked) => blocked,
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::debug!(tx, object = %blocked, ?wait, "lock wait timed out");
                return Err(StoreError::LockTimeout {
                    object: blocked,
                    waited: wait,
                });
            }
        }
    }

    /// Returns `true` if `tx` holds the lock on `object`
    pub(super) fn is_held_by(&self, tx: TxId, object: &ObjectRef) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(object)
            .is_some_and(|holder| *holder == tx)
    }

    /// Release every lock of `tx` and wake waiting transactions.
    pub(super) fn release_all(&self, tx: TxId) {
        let released = {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            let before = held.len();
            held.retain(|_, holder| *holder != tx);
            before != held.len()
        };
        if released {
            self.released.notify_waiters();
        }
    }
}

/// Locks held outside any transaction, released on drop.
///
/// Returned by [`InMemoryStore::hold_locks`](super::InMemoryStore::hold_locks)
/// to simulate a concurrent writer.
#[derive(Debug)]
#[must_use = "the locks are released as soon as the hold is dropped"]
pub struct LockHold {
    table: Arc<LockTable>,
    tx: TxId,
}

impl LockHold {
    pub(super) fn new(table: Arc<LockTable>, tx: TxId) -> Self {
        Self { table, tx }
    }
}

impl Drop for LockHold {
    fn drop(&mut self) {
        self.table.release_all(self.tx);
    }
}
