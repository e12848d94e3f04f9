//! In-memory graph store backed by HashMap and petgraph.
//!
//! This backend holds every row and edge in RAM. It is suitable for:
//!
//! - Embedding the engine in tests of upstream services
//! - Exercising partial-failure paths through fault injection
//! - Benchmarking the resolver without a database
//!
//! # Architecture
//!
//! - `HashMap<ObjectRef, Ownership>` for O(1) ownership lookups
//! - `petgraph::StableDiGraph` for containment and reference edges
//! - `HashMap<ObjectRef, NodeIndex>` for mapping objects to graph nodes
//! - A lock table of object-level write locks shared by all transactions
//!
//! ## Edge Direction Convention
//!
//! - **Containment**: parent -> child (e.g. `Dataset -> Image`)
//! - **Reference**: referrer -> target (e.g. `Image -> Annotation`)
//!
//! Containment legality follows [`ObjectKind::may_contain`]; only shareable
//! kinds may be referenced. Edges that would close a cycle are rejected.
//!
//! ## Transactions
//!
//! A transaction stages deletes and applies them in one step on commit, so
//! concurrent readers never observe half a batch. Reads inside the
//! transaction already see its own staged deletes.
//!
//! # Fault Injection
//!
//! [`InMemoryStore::fail_deletes_of`] makes every delete of one object fail,
//! and [`InMemoryStore::hold_locks`] keeps objects locked as if a concurrent
//! writer held them.
//!
//! [`ObjectKind::may_contain`]: crate::domain::ObjectKind::may_contain

mod graph;
mod inner;
mod locks;
mod transaction;

use crate::domain::{Link, ObjectRef, Ownership, PrincipalId};
use crate::error::{StoreError, StoreResult};
use crate::storage::{GraphStore, StoreTransaction};
use async_trait::async_trait;
use inner::InMemoryStoreInner;
use locks::LockTable;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use transaction::InMemoryTransaction;

pub use locks::LockHold;

/// Thread-safe in-memory graph store.
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryStoreInner>>,
    locks: Arc<LockTable>,
    next_tx: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryStoreInner::new())),
            locks: Arc::new(LockTable::default()),
            next_tx: AtomicU64::new(1),
        }
    }

    fn next_tx_id(&self) -> u64 {
        self.next_tx.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the object already exists.
    pub async fn insert(&self, object: ObjectRef, ownership: Ownership) -> StoreResult<()> {
        self.inner.lock().await.insert(object, ownership)
    }

    /// Insert a row owned by `parent` through a containment edge.
    ///
    /// The child joins the parent's group.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the parent doesn't exist
    /// - `StoreError::InvalidEdge` if the parent kind cannot contain the child kind
    pub async fn insert_contained(
        &self,
        parent: ObjectRef,
        child: ObjectRef,
        owner: PrincipalId,
    ) -> StoreResult<Ownership> {
        let mut inner = self.inner.lock().await;
        let group = inner
            .objects
            .get(&parent)
            .ok_or(StoreError::NotFound(parent))?
            .group;
        let ownership = Ownership::new(owner, group);

        inner.insert(child, ownership)?;
        if let Err(error) = inner.add_containment(parent, child) {
            // Undo the insert so a rejected edge leaves no orphan row
            inner.remove(&child);
            return Err(error);
        }
        Ok(ownership)
    }

    /// Add a containment edge between two existing rows.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if either row doesn't exist
    /// - `StoreError::InvalidEdge` for illegal kinds or duplicate edges
    /// - `StoreError::Cycle` if the edge would close a cycle
    pub async fn add_child(&self, parent: ObjectRef, child: ObjectRef) -> StoreResult<()> {
        self.inner.lock().await.add_containment(parent, child)
    }

    /// Add a reference edge from `referrer` to a shareable `target`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if either row doesn't exist
    /// - `StoreError::InvalidEdge` if the target kind is not shareable or the edge exists
    pub async fn add_reference(&self, referrer: ObjectRef, target: ObjectRef) -> StoreResult<()> {
        self.inner.lock().await.add_reference(referrer, target)
    }

    /// Returns `true` if the row exists
    pub async fn contains(&self, object: &ObjectRef) -> bool {
        self.inner.lock().await.objects.contains_key(object)
    }

    /// Number of live rows
    pub async fn len(&self) -> usize {
        self.inner.lock().await.objects.len()
    }

    /// Returns `true` if the store holds no rows
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.objects.is_empty()
    }

    /// Make every delete of `object` fail with `message`.
    pub async fn fail_deletes_of(&self, object: ObjectRef, message: impl Into<String>) {
        self.inner
            .lock()
            .await
            .failing_deletes
            .insert(object, message.into());
    }

    /// Remove all injected delete failures.
    pub async fn clear_failures(&self) {
        self.inner.lock().await.failing_deletes.clear();
    }

    /// Lock objects outside any transaction until the returned hold is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` immediately if one of the objects is
    /// already locked.
    pub fn hold_locks(&self, objects: &[ObjectRef]) -> StoreResult<LockHold> {
        let tx = self.next_tx_id();
        self.locks
            .try_acquire(tx, objects)
            .map_err(|object| StoreError::LockTimeout {
                object,
                waited: std::time::Duration::ZERO,
            })?;
        Ok(LockHold::new(Arc::clone(&self.locks), tx))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn get_children(&self, object: &ObjectRef) -> StoreResult<Vec<Link>> {
        Ok(self.inner.lock().await.children(object))
    }

    async fn get_referrers(&self, object: &ObjectRef) -> StoreResult<Vec<ObjectRef>> {
        Ok(self.inner.lock().await.referrers(object))
    }

    async fn get_owner_and_group(&self, object: &ObjectRef) -> StoreResult<Option<Ownership>> {
        Ok(self.inner.lock().await.objects.get(object).copied())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.next_tx_id();
        tracing::trace!(tx, "begin transaction");
        Ok(Box::new(InMemoryTransaction::new(
            tx,
            Arc::clone(&self.inner),
            Arc::clone(&self.locks),
        )))
    }
}
