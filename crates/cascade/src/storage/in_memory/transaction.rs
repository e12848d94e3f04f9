//! StoreTransaction implementation for in-memory storage.

use super::inner::InMemoryStoreInner;
use super::locks::{LockTable, TxId};
use crate::domain::{ObjectRef, Ownership};
use crate::error::{StoreError, StoreResult};
use crate::storage::StoreTransaction;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Write transaction that stages deletes until commit.
pub(super) struct InMemoryTransaction {
    id: TxId,
    inner: Arc<Mutex<InMemoryStoreInner>>,
    locks: Arc<LockTable>,
    staged: BTreeSet<ObjectRef>,
}

impl InMemoryTransaction {
    pub(super) fn new(
        id: TxId,
        inner: Arc<Mutex<InMemoryStoreInner>>,
        locks: Arc<LockTable>,
    ) -> Self {
        Self {
            id,
            inner,
            locks,
            staged: BTreeSet::new(),
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock(&mut self, objects: &[ObjectRef], wait: Duration) -> StoreResult<()> {
        self.locks.acquire(self.id, objects, wait).await
    }

    async fn owner_and_group(&mut self, object: &ObjectRef) -> StoreResult<Option<Ownership>> {
        if self.staged.contains(object) {
            return Ok(None);
        }
        Ok(self.inner.lock().await.objects.get(object).copied())
    }

    async fn referrers(&mut self, object: &ObjectRef) -> StoreResult<Vec<ObjectRef>> {
        let mut referrers = self.inner.lock().await.referrers(object);
        referrers.retain(|referrer| !self.staged.contains(referrer));
        Ok(referrers)
    }

    async fn delete(&mut self, object: &ObjectRef) -> StoreResult<()> {
        if !self.locks.is_held_by(self.id, object) {
            return Err(StoreError::Backend(format!(
                "{object} deleted without holding its lock"
            )));
        }

        let inner = self.inner.lock().await;
        if let Some(message) = inner.failing_deletes.get(object) {
            return Err(StoreError::Backend(message.clone()));
        }
        if self.staged.contains(object) || !inner.objects.contains_key(object) {
            return Err(StoreError::NotFound(*object));
        }
        drop(inner);

        self.staged.insert(*object);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut inner = self.inner.lock().await;
            for object in &staged {
                inner.remove(object);
            }
        }
        tracing::trace!(tx = self.id, deleted = staged.len(), "commit transaction");
        self.locks.release_all(self.id);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        let discarded = std::mem::take(&mut self.staged).len();
        tracing::trace!(tx = self.id, discarded, "rollback transaction");
        self.locks.release_all(self.id);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.locks.release_all(self.id);
    }
}
