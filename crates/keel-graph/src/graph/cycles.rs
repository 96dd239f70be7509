//! Cycle detection for requirement edges.
//!
//! Adding `from -> to` closes a cycle if `from` is already reachable from
//! `to`. The builder checks this before every edge to an existing node, so
//! a recipe cycle is reported as soon as expansion reaches it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::visit::EdgeRef;

use super::{Graph, NodeId};

/// Check whether adding `from -> to` would introduce a cycle.
///
/// Returns the cycle as references, `from -> to -> ... -> from`.
#[must_use]
pub fn would_create_cycle(graph: &Graph, from: NodeId, to: NodeId) -> Option<Vec<String>> {
    if from == to {
        let id = label(graph, from);
        return Some(vec![id.clone(), id]);
    }

    // BFS from `to` looking for `from`.
    let inner = graph.inner();
    let mut queue: VecDeque<NodeId> = VecDeque::from([to]);
    let mut visited: HashSet<NodeId> = HashSet::from([to]);
    let mut parent: HashMap<NodeId, NodeId> = HashMap::new();

    while let Some(current) = queue.pop_front() {
        if current == from {
            return Some(reconstruct(graph, from, to, &parent));
        }
        for edge in inner.edges(current) {
            let next = edge.target();
            if visited.insert(next) {
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    None
}

/// Some cycle present in `graph`, if any.
#[must_use]
pub fn find_cycle(graph: &Graph) -> Option<Vec<String>> {
    let inner = graph.inner();
    let component = tarjan_scc(inner).into_iter().find(|component| {
        component.len() > 1
            || component
                .first()
                .is_some_and(|&n| inner.find_edge(n, n).is_some())
    })?;

    let members: BTreeSet<NodeId> = component.iter().copied().collect();
    let start = *members.first()?;
    // Walk inside the component until a node repeats.
    let mut order = vec![start];
    let mut seen = HashSet::from([start]);
    let mut cursor = start;
    loop {
        let next = inner
            .edges(cursor)
            .map(|e| e.target())
            .filter(|t| members.contains(t))
            .min()?;
        if !seen.insert(next) {
            let from = order.iter().position(|&n| n == next).unwrap_or(0);
            let mut path: Vec<String> = order[from..].iter().map(|&n| label(graph, n)).collect();
            path.push(label(graph, next));
            return Some(path);
        }
        order.push(next);
        cursor = next;
    }
}

fn reconstruct(
    graph: &Graph,
    from: NodeId,
    to: NodeId,
    parent: &HashMap<NodeId, NodeId>,
) -> Vec<String> {
    // Parent links run to -> ... -> from; prepend `from` for the new edge.
    let mut to_to_from: Vec<NodeId> = vec![from];
    let mut cursor = from;
    while cursor != to {
        match parent.get(&cursor) {
            Some(next) => {
                cursor = *next;
                to_to_from.push(cursor);
            }
            None => break,
        }
    }
    to_to_from.reverse();

    let mut cycle = Vec::with_capacity(to_to_from.len() + 1);
    cycle.push(label(graph, from));
    cycle.extend(to_to_from.into_iter().map(|id| label(graph, id)));
    cycle
}

fn label(graph: &Graph, id: NodeId) -> String {
    graph[id].reference.to_string()
}
