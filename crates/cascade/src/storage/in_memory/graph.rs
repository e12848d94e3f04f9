//! Edge queries over the in-memory object graph.

use crate::domain::{Link, LinkKind, ObjectRef};
use petgraph::Direction;
use petgraph::algo;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

/// Returns `true` if adding `from -> to` would close a cycle, i.e. `from`
/// is already reachable from `to`.
pub(super) fn would_create_cycle(
    graph: &StableDiGraph<ObjectRef, LinkKind>,
    from: NodeIndex,
    to: NodeIndex,
) -> bool {
    from == to || algo::has_path_connecting(graph, to, from, None)
}

/// Outgoing edges of a node, sorted for deterministic traversal.
pub(super) fn outgoing_links(
    graph: &StableDiGraph<ObjectRef, LinkKind>,
    node: NodeIndex,
) -> Vec<Link> {
    let mut links: Vec<Link> = graph
        .edges(node)
        .map(|edge| Link {
            target: graph[edge.target()],
            kind: *edge.weight(),
        })
        .collect();
    links.sort_by_key(|link| link.target);
    links
}

/// Sources of incoming reference edges, sorted.
///
/// Containment parents are not referrers and are skipped.
pub(super) fn incoming_references(
    graph: &StableDiGraph<ObjectRef, LinkKind>,
    node: NodeIndex,
) -> Vec<ObjectRef> {
    let mut referrers: Vec<ObjectRef> = graph
        .edges_directed(node, Direction::Incoming)
        .filter(|edge| *edge.weight() == LinkKind::Reference)
        .map(|edge| graph[edge.source()])
        .collect();
    referrers.sort();
    referrers
}
