//! Core in-memory data structures.
//!
//! This module contains the inner store that holds all rows and edges and
//! is wrapped in `Arc<Mutex<>>` by [`InMemoryStore`](super::InMemoryStore).

use super::graph::{incoming_references, outgoing_links, would_create_cycle};
use crate::domain::{Link, LinkKind, ObjectRef, Ownership};
use crate::error::{StoreError, StoreResult};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::collections::HashMap;

/// Inner store (not thread-safe).
///
/// # Graph Representation
///
/// Edges point from **parent to child** for containment and from
/// **referrer to target** for references; the edge weight is the
/// [`LinkKind`]. A `StableDiGraph` keeps node indices valid across removals,
/// so `node_map` never has to be rebuilt.
pub(crate) struct InMemoryStoreInner {
    /// Owner and group of every live row
    pub(super) objects: HashMap<ObjectRef, Ownership>,

    /// Containment and reference edges
    pub(super) graph: StableDiGraph<ObjectRef, LinkKind>,

    /// Mapping from object to graph node.
    ///
    /// Every key of `objects` has an entry here.
    pub(super) node_map: HashMap<ObjectRef, NodeIndex>,

    /// Injected delete failures, keyed by object
    pub(super) failing_deletes: HashMap<ObjectRef, String>,
}

impl InMemoryStoreInner {
    /// Create an empty store
    pub(crate) fn new() -> Self {
        Self {
            objects: HashMap::new(),
            graph: StableDiGraph::new(),
            node_map: HashMap::new(),
            failing_deletes: HashMap::new(),
        }
    }

    fn node(&self, object: &ObjectRef) -> StoreResult<NodeIndex> {
        self.node_map
            .get(object)
            .copied()
            .ok_or(StoreError::NotFound(*object))
    }

    pub(super) fn insert(&mut self, object: ObjectRef, ownership: Ownership) -> StoreResult<()> {
        if self.objects.contains_key(&object) {
            return Err(StoreError::Backend(format!("{object} already exists")));
        }
        let node = self.graph.add_node(object);
        self.node_map.insert(object, node);
        self.objects.insert(object, ownership);
        Ok(())
    }

    pub(super) fn add_containment(
        &mut self,
        parent: ObjectRef,
        child: ObjectRef,
    ) -> StoreResult<()> {
        if !parent.kind.may_contain(child.kind) {
            return Err(StoreError::InvalidEdge {
                from: parent,
                to: child,
                reason: format!("{} cannot contain {}", parent.kind, child.kind),
            });
        }
        let from = self.node(&parent)?;
        let to = self.node(&child)?;

        if self.graph.find_edge(from, to).is_some() {
            return Err(StoreError::InvalidEdge {
                from: parent,
                to: child,
                reason: "edge already exists".to_string(),
            });
        }
        if would_create_cycle(&self.graph, from, to) {
            return Err(StoreError::Cycle {
                from: parent,
                to: child,
            });
        }

        self.graph.add_edge(from, to, LinkKind::Containment);
        Ok(())
    }

    pub(super) fn add_reference(
        &mut self,
        referrer: ObjectRef,
        target: ObjectRef,
    ) -> StoreResult<()> {
        if !target.kind.is_shareable() {
            return Err(StoreError::InvalidEdge {
                from: referrer,
                to: target,
                reason: format!("{} cannot be referenced", target.kind),
            });
        }
        let from = self.node(&referrer)?;
        let to = self.node(&target)?;

        if self.graph.find_edge(from, to).is_some() {
            return Err(StoreError::InvalidEdge {
                from: referrer,
                to: target,
                reason: "edge already exists".to_string(),
            });
        }
        if would_create_cycle(&self.graph, from, to) {
            return Err(StoreError::Cycle {
                from: referrer,
                to: target,
            });
        }

        self.graph.add_edge(from, to, LinkKind::Reference);
        Ok(())
    }

    pub(super) fn children(&self, object: &ObjectRef) -> Vec<Link> {
        match self.node_map.get(object) {
            Some(&node) => outgoing_links(&self.graph, node),
            None => Vec::new(),
        }
    }

    pub(super) fn referrers(&self, object: &ObjectRef) -> Vec<ObjectRef> {
        match self.node_map.get(object) {
            Some(&node) => incoming_references(&self.graph, node),
            None => Vec::new(),
        }
    }

    /// Remove a row and every edge touching it. Absent rows are ignored.
    pub(super) fn remove(&mut self, object: &ObjectRef) {
        if let Some(node) = self.node_map.remove(object) {
            self.graph.remove_node(node);
        }
        self.objects.remove(object);
    }
}
