//! Dependency resolution: from requested roots to the delete closure.
//!
//! The resolver walks the object graph breadth-first from every requested
//! root, following containment and reference links alike, and records the
//! traversal in an arena keyed by [`ObjectRef`]. Entities never carry
//! back-pointers; all parent, child and referrer relations live in the
//! [`ClosureEntry`] table.
//!
//! A root's traversal is staged locally and merged into the closure only if
//! every store read for it succeeded, so a store error or a missing root
//! never affects sibling roots.

pub mod ordering;

use crate::domain::{
    DeleteOutcome, DeleteRequest, Failure, Link, LinkKind, ObjectRef, Ownership, PrincipalId,
    RetainReason,
};
use crate::error::StoreResult;
use crate::storage::GraphStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// A referrer that lies outside the closure and therefore survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Referrer {
    /// The referring object
    pub object: ObjectRef,
    /// Its owner, `None` if it vanished while resolving
    pub owner: Option<PrincipalId>,
}

/// Traversal record of one object in the closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureEntry {
    /// Owner and group at resolution time
    pub ownership: Ownership,

    /// Shortest link distance from any root
    pub depth: usize,

    /// Named directly by a request
    pub requested: bool,

    /// OR of the `force` flags of every request whose traversal reached it
    pub force: bool,

    /// Outgoing links to other closure members
    pub children: Vec<Link>,

    /// Incoming links from other closure members; `target` is the parent
    pub parents: Vec<Link>,

    /// Referrers not in the closure
    pub outside_referrers: Vec<Referrer>,
}

impl ClosureEntry {
    /// In-closure containment children
    pub fn contained(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.children
            .iter()
            .filter(|link| link.kind == LinkKind::Containment)
            .map(|link| link.target)
    }

    /// In-closure objects holding a reference to this one
    pub fn referrers(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.parents
            .iter()
            .filter(|link| link.kind == LinkKind::Reference)
            .map(|link| link.target)
    }

    /// Returns `true` if the object has in-closure parents and all of them
    /// are referrers.
    #[must_use]
    pub fn reached_only_by_reference(&self) -> bool {
        !self.parents.is_empty()
            && self
                .parents
                .iter()
                .all(|link| link.kind == LinkKind::Reference)
    }
}

/// The full set of objects considered by one delete batch.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    /// Distinct requested roots in request order
    pub roots: Vec<ObjectRef>,

    /// Arena of traversed objects
    pub entries: BTreeMap<ObjectRef, ClosureEntry>,

    /// Roots settled during resolution (absent, or failing store reads)
    pub outcomes: BTreeMap<ObjectRef, DeleteOutcome>,
}

impl Closure {
    /// Entry of an object
    #[must_use]
    pub fn get(&self, object: &ObjectRef) -> Option<&ClosureEntry> {
        self.entries.get(object)
    }

    /// Returns `true` if the object is in the closure
    #[must_use]
    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.entries.contains_key(object)
    }

    /// Number of objects in the closure
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is left to delete
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove objects and every in-closure link touching them.
    pub fn remove(&mut self, objects: &BTreeSet<ObjectRef>) {
        self.entries.retain(|object, _| !objects.contains(object));
        for entry in self.entries.values_mut() {
            entry.children.retain(|link| !objects.contains(&link.target));
            entry.parents.retain(|link| !objects.contains(&link.target));
        }
    }
}

/// A root request after merging duplicates.
#[derive(Debug, Clone)]
struct RootRequest {
    target: ObjectRef,
    force: bool,
    exclude_child_ids: BTreeSet<i64>,
}

/// Merge requests naming the same root, preserving first-seen order.
fn merge_requests(requests: &[DeleteRequest]) -> Vec<RootRequest> {
    let mut merged: Vec<RootRequest> = Vec::new();
    let mut positions: HashMap<ObjectRef, usize> = HashMap::new();

    for request in requests {
        if let Some(&position) = positions.get(&request.target) {
            let root = &mut merged[position];
            root.force |= request.options.force;
            root.exclude_child_ids
                .extend(request.options.exclude_child_ids.iter().copied());
        } else {
            positions.insert(request.target, merged.len());
            merged.push(RootRequest {
                target: request.target,
                force: request.options.force,
                exclude_child_ids: request.options.exclude_child_ids.clone(),
            });
        }
    }
    merged
}

/// Objects reached by one root, before merging.
#[derive(Debug)]
struct Staged {
    ownership: Ownership,
    depth: usize,
    children: Vec<Link>,
    referrers: Vec<ObjectRef>,
}

/// Outcome of walking one root.
enum Walk {
    Absent,
    Reached(HashMap<ObjectRef, Staged>),
}

async fn walk(store: &dyn GraphStore, root: &RootRequest) -> StoreResult<Walk> {
    let Some(ownership) = store.get_owner_and_group(&root.target).await? else {
        return Ok(Walk::Absent);
    };

    let mut staged: HashMap<ObjectRef, Staged> = HashMap::new();
    let mut queue = VecDeque::from([(root.target, ownership, 0_usize)]);

    while let Some((object, ownership, depth)) = queue.pop_front() {
        if staged.contains_key(&object) {
            continue;
        }

        let mut children = Vec::new();
        for link in store.get_children(&object).await? {
            if root.exclude_child_ids.contains(&link.target.id) {
                tracing::trace!(parent = %object, child = %link.target, "child excluded");
                continue;
            }
            // Rows that vanish mid-traversal are simply not part of the closure
            let Some(child_ownership) = store.get_owner_and_group(&link.target).await? else {
                continue;
            };
            if !staged.contains_key(&link.target) {
                queue.push_back((link.target, child_ownership, depth + 1));
            }
            children.push(link);
        }

        let referrers = store.get_referrers(&object).await?;
        staged.insert(
            object,
            Staged {
                ownership,
                depth,
                children,
                referrers,
            },
        );
    }

    Ok(Walk::Reached(staged))
}

/// Expand requests into the delete closure.
///
/// Requests naming the same root are merged: `force` flags are OR-ed and
/// exclusions unioned. Absent roots are settled as
/// [`RetainReason::NotFound`]; roots whose traversal hits a store error are
/// settled as a storage failure. Neither affects other roots.
pub async fn resolve(store: &dyn GraphStore, requests: &[DeleteRequest]) -> Closure {
    let mut closure = Closure::default();
    let mut referrers: HashMap<ObjectRef, Vec<ObjectRef>> = HashMap::new();

    for root in merge_requests(requests) {
        closure.roots.push(root.target);

        let staged = match walk(store, &root).await {
            Ok(Walk::Reached(staged)) => staged,
            Ok(Walk::Absent) => {
                tracing::debug!(root = %root.target, "requested object not found");
                closure
                    .outcomes
                    .insert(root.target, DeleteOutcome::Retained(RetainReason::NotFound));
                continue;
            }
            Err(error) => {
                tracing::warn!(root = %root.target, %error, "resolution failed");
                closure.outcomes.insert(
                    root.target,
                    DeleteOutcome::Failed(Failure::storage(error.to_string())),
                );
                continue;
            }
        };

        for (object, staged) in staged {
            referrers.insert(object, staged.referrers);
            let entry = closure
                .entries
                .entry(object)
                .or_insert_with(|| ClosureEntry {
                    ownership: staged.ownership,
                    depth: staged.depth,
                    requested: false,
                    force: false,
                    children: Vec::new(),
                    parents: Vec::new(),
                    outside_referrers: Vec::new(),
                });
            entry.depth = entry.depth.min(staged.depth);
            entry.force |= root.force;
            for link in staged.children {
                if !entry.children.contains(&link) {
                    entry.children.push(link);
                }
            }
        }
        if let Some(entry) = closure.entries.get_mut(&root.target) {
            entry.requested = true;
        }
    }

    link_parents(&mut closure);
    record_outside_referrers(store, &mut closure, referrers).await;

    tracing::debug!(
        roots = closure.roots.len(),
        objects = closure.entries.len(),
        "closure resolved"
    );
    closure
}

/// Fill in the reverse of every in-closure child link.
fn link_parents(closure: &mut Closure) {
    let links: Vec<(ObjectRef, Link)> = closure
        .entries
        .iter()
        .flat_map(|(parent, entry)| entry.children.iter().map(move |link| (*parent, *link)))
        .collect();

    for (parent, link) in links {
        if let Some(child) = closure.entries.get_mut(&link.target) {
            child.parents.push(Link {
                target: parent,
                kind: link.kind,
            });
        }
    }
    for entry in closure.entries.values_mut() {
        entry.children.sort_by_key(|link| link.target);
        entry.parents.sort_by_key(|link| link.target);
    }
}

/// Record referrers that are not part of the closure, with their owners.
///
/// Excluded children are not in the closure, so the references they hold
/// keep counting against their targets.
async fn record_outside_referrers(
    store: &dyn GraphStore,
    closure: &mut Closure,
    referrers: HashMap<ObjectRef, Vec<ObjectRef>>,
) {
    let mut owners: HashMap<ObjectRef, Option<PrincipalId>> = HashMap::new();

    for (object, object_referrers) in referrers {
        let mut outside = Vec::new();
        for referrer in object_referrers {
            if closure.contains(&referrer) {
                continue;
            }
            let owner = match owners.get(&referrer) {
                Some(owner) => *owner,
                None => {
                    // An unreadable referrer still counts; only its owner is unknown
                    let owner = store
                        .get_owner_and_group(&referrer)
                        .await
                        .ok()
                        .flatten()
                        .map(|ownership| ownership.owner);
                    owners.insert(referrer, owner);
                    owner
                }
            };
            outside.push(Referrer {
                object: referrer,
                owner,
            });
        }
        if let Some(entry) = closure.entries.get_mut(&object) {
            entry.outside_referrers = outside;
        }
    }
}
