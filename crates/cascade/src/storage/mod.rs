//! Graph store abstraction consumed by the delete engine.
//!
//! The engine never owns the object graph. It asks the store for edges on
//! demand and performs all row removal through [`StoreTransaction`]:
//!
//! - **Resolution** reads [`GraphStore::get_children`],
//!   [`GraphStore::get_referrers`] and [`GraphStore::get_owner_and_group`]
//!   outside any transaction
//! - **Execution** opens one transaction per batch, locks every object of
//!   the batch, re-reads ownership and referrers inside the transaction and
//!   deletes
//!
//! # Architecture
//!
//! Both traits are async and object-safe so the engine can hold an
//! `Arc<dyn GraphStore>`. The bundled backend is [`in_memory`], a
//! `petgraph`-backed store for embedding and tests.
//!
//! # Example
//!
//! ```no_run
//! use cascade::domain::{GroupId, ObjectRef, Ownership, PrincipalId};
//! use cascade::storage::in_memory::InMemoryStore;
//! use cascade::storage::GraphStore;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let store = InMemoryStore::new();
//!     let owner = Ownership::new(PrincipalId(1), GroupId(1));
//!     store.insert(ObjectRef::image(1), owner).await?;
//!
//!     let found = store.get_owner_and_group(&ObjectRef::image(1)).await?;
//!     assert_eq!(found, Some(owner));
//!     Ok(())
//! }
//! ```

use crate::domain::{Link, ObjectRef, Ownership};
use crate::error::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

pub mod in_memory;

/// Read side of the object store, plus the transaction factory.
///
/// Implementations must be `Send + Sync`; the engine queries them from
/// concurrently running subgraphs.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Outgoing edges of an object, containment and reference alike.
    ///
    /// Returns an empty list for leaves and for absent objects.
    async fn get_children(&self, object: &ObjectRef) -> StoreResult<Vec<Link>>;

    /// Objects holding a reference edge to `object`.
    ///
    /// The length of the result is the object's reference count.
    async fn get_referrers(&self, object: &ObjectRef) -> StoreResult<Vec<ObjectRef>>;

    /// Owner and group of an object, `None` if it does not exist.
    async fn get_owner_and_group(&self, object: &ObjectRef) -> StoreResult<Option<Ownership>>;

    /// Open a write transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// A write transaction over the object store.
///
/// Reads inside the transaction observe its own uncommitted deletes.
/// Dropping a transaction without committing discards it and releases its
/// locks.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Acquire exclusive write locks on every object, waiting at most `wait`.
    ///
    /// Either all locks are taken or none are.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if another transaction keeps one of
    /// the objects locked for longer than `wait`.
    async fn lock(&mut self, objects: &[ObjectRef], wait: Duration) -> StoreResult<()>;

    /// Owner and group as seen by this transaction.
    async fn owner_and_group(&mut self, object: &ObjectRef) -> StoreResult<Option<Ownership>>;

    /// Live referrers as seen by this transaction.
    async fn referrers(&mut self, object: &ObjectRef) -> StoreResult<Vec<ObjectRef>>;

    /// Delete the row together with all its incoming and outgoing edges.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object is absent, or a
    /// backend-specific error.
    async fn delete(&mut self, object: &ObjectRef) -> StoreResult<()>;

    /// Make every delete of this transaction visible atomically.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every delete of this transaction.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
