//! Batch planning over the closure.
//!
//! ## Operations
//!
//! | Operation | Algorithm |
//! |-----------|-----------|
//! | Independent subgraphs | Union-find over in-closure links |
//! | Cycle detection | Tarjan's SCC algorithm |
//! | Parents-first evaluation order | Topological sort |
//! | Delete levels | Topological sort, longest path from the leaves |
//!
//! An object waits for its containment children (leaves first) and for the
//! objects referencing it (links vanish before their targets are checked).

use super::Closure;
use crate::domain::ObjectRef;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One group of objects sharing no link with any other group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subgraph {
    /// Objects per level, leaves first; each level is one transaction
    pub batches: Vec<Vec<ObjectRef>>,

    /// Objects that must be gone before each object is attempted
    pub predecessors: BTreeMap<ObjectRef, Vec<ObjectRef>>,
}

impl Subgraph {
    /// All objects of the subgraph, level by level
    pub fn objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.batches.iter().flatten().copied()
    }

    /// Level of an object, `None` if it is not part of this subgraph
    #[must_use]
    pub fn level_of(&self, object: &ObjectRef) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.contains(object))
    }
}

/// Execution plan of a delete batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Independent subgraphs, in order of their smallest object
    pub subgraphs: Vec<Subgraph>,

    /// Objects whose ordering graph has a cycle; they are never attempted
    pub invalid: BTreeSet<ObjectRef>,
}

impl Plan {
    /// Number of planned objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.subgraphs.iter().map(|subgraph| subgraph.objects().count()).sum()
    }

    /// Returns `true` if nothing will be attempted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subgraphs.is_empty()
    }
}

/// Partition `members` into groups connected through in-closure links.
///
/// Links to objects outside `members` are ignored.
#[must_use]
pub fn components(closure: &Closure, members: &BTreeSet<ObjectRef>) -> Vec<Vec<ObjectRef>> {
    let index: HashMap<ObjectRef, usize> = members
        .iter()
        .enumerate()
        .map(|(position, object)| (*object, position))
        .collect();
    let mut sets = UnionFind::<usize>::new(members.len());

    for (object, &position) in &index {
        let Some(entry) = closure.get(object) else {
            continue;
        };
        for link in &entry.children {
            if let Some(&child) = index.get(&link.target) {
                sets.union(position, child);
            }
        }
    }

    let mut grouped: BTreeMap<usize, Vec<ObjectRef>> = BTreeMap::new();
    for object in members {
        grouped
            .entry(sets.find(index[object]))
            .or_default()
            .push(*object);
    }

    let mut groups: Vec<Vec<ObjectRef>> = grouped.into_values().collect();
    groups.sort_by_key(|group| group.first().copied());
    groups
}

/// Objects of every connected component that contains a link cycle.
#[must_use]
pub fn cyclic_objects(closure: &Closure) -> BTreeSet<ObjectRef> {
    let mut graph: DiGraph<ObjectRef, ()> = DiGraph::new();
    let nodes: HashMap<ObjectRef, NodeIndex> = closure
        .entries
        .keys()
        .map(|object| (*object, graph.add_node(*object)))
        .collect();

    for (object, entry) in &closure.entries {
        for link in &entry.children {
            if let Some(&child) = nodes.get(&link.target) {
                graph.add_edge(nodes[object], child, ());
            }
        }
    }

    let cyclic: BTreeSet<ObjectRef> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|node| graph[node])
        .collect();

    if cyclic.is_empty() {
        return cyclic;
    }

    let all: BTreeSet<ObjectRef> = closure.entries.keys().copied().collect();
    components(closure, &all)
        .into_iter()
        .filter(|group| group.iter().any(|object| cyclic.contains(object)))
        .flatten()
        .collect()
}

/// Closure objects ordered so every parent precedes its children.
///
/// Falls back to depth order if the closure still holds a cycle.
#[must_use]
pub fn parents_first(closure: &Closure) -> Vec<ObjectRef> {
    let mut graph: DiGraph<ObjectRef, ()> = DiGraph::new();
    let nodes: HashMap<ObjectRef, NodeIndex> = closure
        .entries
        .keys()
        .map(|object| (*object, graph.add_node(*object)))
        .collect();

    for (object, entry) in &closure.entries {
        for link in &entry.children {
            if let Some(&child) = nodes.get(&link.target) {
                graph.add_edge(nodes[object], child, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|node| graph[node]).collect(),
        Err(_) => {
            let mut order: Vec<ObjectRef> = closure.entries.keys().copied().collect();
            order.sort_by_key(|object| (closure.entries[object].depth, *object));
            order
        }
    }
}

/// Objects that must be gone before `object` is deleted.
fn predecessors_of(
    closure: &Closure,
    eligible: &BTreeSet<ObjectRef>,
    object: &ObjectRef,
) -> Vec<ObjectRef> {
    let Some(entry) = closure.get(object) else {
        return Vec::new();
    };
    let mut predecessors: Vec<ObjectRef> = entry
        .contained()
        .chain(entry.referrers())
        .filter(|candidate| eligible.contains(candidate))
        .collect();
    predecessors.sort();
    predecessors.dedup();
    predecessors
}

/// Plan the deletion of `eligible` closure members.
///
/// Each independent subgraph is layered by
/// `level(x) = 1 + max(level(predecessor))`, with leaves at level 0.
#[must_use]
pub fn plan(closure: &Closure, eligible: &BTreeSet<ObjectRef>) -> Plan {
    let mut result = Plan::default();

    for group in components(closure, eligible) {
        let mut graph: DiGraph<ObjectRef, ()> = DiGraph::new();
        let nodes: HashMap<ObjectRef, NodeIndex> = group
            .iter()
            .map(|object| (*object, graph.add_node(*object)))
            .collect();

        let mut predecessors = BTreeMap::new();
        for object in &group {
            let before = predecessors_of(closure, eligible, object);
            for predecessor in &before {
                if let Some(&from) = nodes.get(predecessor) {
                    graph.add_edge(from, nodes[object], ());
                }
            }
            predecessors.insert(*object, before);
        }

        let Ok(order) = toposort(&graph, None) else {
            tracing::warn!(objects = group.len(), "delete order has a cycle");
            result.invalid.extend(group);
            continue;
        };

        let mut levels: HashMap<ObjectRef, usize> = HashMap::new();
        for node in order {
            let object = graph[node];
            let level = predecessors[&object]
                .iter()
                .filter_map(|predecessor| levels.get(predecessor))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(object, level);
        }

        let depth = levels.values().copied().max().map_or(0, |max| max + 1);
        let mut batches = vec![Vec::new(); depth];
        for object in &group {
            batches[levels[object]].push(*object);
        }

        result.subgraphs.push(Subgraph {
            batches,
            predecessors,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroupId, Link, LinkKind, ObjectKind, Ownership, PrincipalId};
    use crate::resolver::ClosureEntry;
    use proptest::prelude::*;

    fn entry(depth: usize) -> ClosureEntry {
        ClosureEntry {
            ownership: Ownership::new(PrincipalId(1), GroupId(1)),
            depth,
            requested: depth == 0,
            force: false,
            children: Vec::new(),
            parents: Vec::new(),
            outside_referrers: Vec::new(),
        }
    }

    fn link(closure: &mut Closure, parent: ObjectRef, child: ObjectRef, kind: LinkKind) {
        closure
            .entries
            .get_mut(&parent)
            .unwrap()
            .children
            .push(Link { target: child, kind });
        closure
            .entries
            .get_mut(&child)
            .unwrap()
            .parents
            .push(Link {
                target: parent,
                kind,
            });
    }

    fn everything(closure: &Closure) -> BTreeSet<ObjectRef> {
        closure.entries.keys().copied().collect()
    }

    fn image_with_tag() -> (Closure, ObjectRef, ObjectRef, ObjectRef) {
        let dataset = ObjectRef::new(ObjectKind::Dataset, 1);
        let image = ObjectRef::image(1);
        let tag = ObjectRef::annotation(1);
        let mut closure = Closure::default();
        closure.entries.insert(dataset, entry(0));
        closure.entries.insert(image, entry(1));
        closure.entries.insert(tag, entry(2));
        link(&mut closure, dataset, image, LinkKind::Containment);
        link(&mut closure, image, tag, LinkKind::Reference);
        (closure, dataset, image, tag)
    }

    #[test]
    fn referrers_precede_their_targets() {
        let (closure, dataset, image, tag) = image_with_tag();

        let plan = plan(&closure, &everything(&closure));

        assert_eq!(plan.subgraphs.len(), 1);
        let subgraph = &plan.subgraphs[0];
        assert_eq!(subgraph.level_of(&image), Some(0));
        assert_eq!(subgraph.level_of(&dataset), Some(1));
        assert_eq!(subgraph.level_of(&tag), Some(1));
        assert_eq!(subgraph.predecessors[&tag], vec![image]);
    }

    #[test]
    fn ineligible_objects_are_not_planned() {
        let (closure, dataset, image, tag) = image_with_tag();
        let eligible = BTreeSet::from([dataset, image]);

        let plan = plan(&closure, &eligible);

        assert_eq!(plan.len(), 2);
        assert!(plan.subgraphs[0].level_of(&tag).is_none());
    }

    #[test]
    fn unrelated_objects_form_separate_subgraphs() {
        let mut closure = Closure::default();
        closure.entries.insert(ObjectRef::image(1), entry(0));
        closure.entries.insert(ObjectRef::image(2), entry(0));

        let plan = plan(&closure, &everything(&closure));

        assert_eq!(plan.subgraphs.len(), 2);
        assert_eq!(plan.subgraphs[0].batches, vec![vec![ObjectRef::image(1)]]);
    }

    #[test]
    fn cycle_fails_its_whole_component() {
        let mut closure = Closure::default();
        let first = ObjectRef::annotation(1);
        let second = ObjectRef::annotation(2);
        let holder = ObjectRef::image(1);
        let bystander = ObjectRef::image(2);
        for object in [first, second, holder, bystander] {
            closure.entries.insert(object, entry(0));
        }
        link(&mut closure, holder, first, LinkKind::Reference);
        link(&mut closure, first, second, LinkKind::Reference);
        link(&mut closure, second, first, LinkKind::Reference);

        let cyclic = cyclic_objects(&closure);

        assert_eq!(cyclic, BTreeSet::from([first, second, holder]));
    }

    #[test]
    fn acyclic_closure_has_no_cyclic_objects() {
        let (closure, ..) = image_with_tag();
        assert!(cyclic_objects(&closure).is_empty());
    }

    #[test]
    fn parents_come_first() {
        let (closure, dataset, image, tag) = image_with_tag();
        let order = parents_first(&closure);
        let position = |object| order.iter().position(|o| *o == object).unwrap();

        assert!(position(dataset) < position(image));
        assert!(position(image) < position(tag));
    }

    /// Random containment tree: node `i > 0` hangs under `parents[i - 1] % i`.
    fn tree_strategy() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(any::<usize>(), 0..40)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn containment_children_are_deleted_first(parents in tree_strategy()) {
            let nodes: Vec<ObjectRef> = (0..=parents.len())
                .map(|id| ObjectRef::new(ObjectKind::Dataset, i64::try_from(id).unwrap_or(i64::MAX)))
                .collect();
            let mut closure = Closure::default();
            for object in &nodes {
                closure.entries.insert(*object, entry(0));
            }
            for (offset, choice) in parents.iter().enumerate() {
                let child = offset + 1;
                let parent = choice % child;
                link(&mut closure, nodes[parent], nodes[child], LinkKind::Containment);
            }

            let plan = plan(&closure, &everything(&closure));

            prop_assert_eq!(plan.subgraphs.len(), 1);
            prop_assert_eq!(plan.len(), nodes.len());
            let subgraph = &plan.subgraphs[0];
            for (offset, choice) in parents.iter().enumerate() {
                let child = nodes[offset + 1];
                let parent = nodes[choice % (offset + 1)];
                prop_assert!(subgraph.level_of(&child) < subgraph.level_of(&parent));
            }
        }
    }
}
