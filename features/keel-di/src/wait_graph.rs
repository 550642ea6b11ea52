use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::{errors::InjectError, key::Key, types::lock};

/// A cache slot of a scope, the unit that can be waited on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Node {
    pub(crate) scope: u64,
    pub(crate) slot: u64,
}

/// Whoever is currently waiting, with the key used to describe it in cycle reports
#[derive(Debug, Clone)]
pub(crate) struct Requester {
    pub(crate) node: Node,
    pub(crate) key: Key,
}

/// Runtime wide "who waits on whom" graph
///
/// An edge is added before a requester awaits an in-flight construction or readiness drive and
/// removed once the wait ends. A new edge that closes a loop is refused with
/// [`InjectError::DependencyCycle`] instead of waiting forever.
#[derive(Default)]
pub(crate) struct WaitGraph {
    edges: Mutex<Vec<Edge>>,
    next_id: AtomicU64,
}

struct Edge {
    id: u64,
    from: Node,
    to: Requester,
}

impl WaitGraph {
    pub(crate) fn wait_on(
        self: &Arc<Self>,
        from: &Requester,
        to: &Requester,
    ) -> Result<WaitEdge, InjectError> {
        let mut edges = lock(&self.edges);

        if let Some(mut chain) = find_path(&edges, to, from.node) {
            chain.push(to.key.clone());
            tracing::debug!(chain = ?chain, "refusing wait, it would close a cycle");
            return Err(InjectError::DependencyCycle { chain });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        edges.push(Edge {
            id,
            from: from.node,
            to: to.clone(),
        });

        Ok(WaitEdge {
            graph: self.clone(),
            id,
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.edges).len()
    }
}

/// Keys along a path `start -> .. -> goal`, both ends included
fn find_path(edges: &[Edge], start: &Requester, goal: Node) -> Option<Vec<Key>> {
    let mut previous: HashMap<Node, (Node, Key)> = HashMap::new();
    let mut visited = HashSet::from([start.node]);
    let mut queue = VecDeque::from([start.node]);

    while let Some(node) = queue.pop_front() {
        if node == goal {
            let mut keys = Vec::new();
            let mut current = node;
            while current != start.node {
                let (prev, key) = previous.get(&current)?;
                keys.push(key.clone());
                current = *prev;
            }
            keys.push(start.key.clone());
            keys.reverse();
            return Some(keys);
        }

        for edge in edges.iter().filter(|edge| edge.from == node) {
            if visited.insert(edge.to.node) {
                previous.insert(edge.to.node, (node, edge.to.key.clone()));
                queue.push_back(edge.to.node);
            }
        }
    }

    None
}

/// Removes its edge when the wait ends
pub(crate) struct WaitEdge {
    graph: Arc<WaitGraph>,
    id: u64,
}
impl Drop for WaitEdge {
    fn drop(&mut self) {
        lock(&self.graph.edges).retain(|edge| edge.id != self.id);
    }
}
