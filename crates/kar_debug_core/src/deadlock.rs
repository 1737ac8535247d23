//! Wait-for cycle detection over a [`BusySnapshot`].
//!
//! Actors are nodes; an edge `src -> dst` means `src` is blocked on a request it sent to
//! `dst`. A cycle is only a deadlock when it closes under a different flow id than the
//! one that first entered the repeated actor; a same-flow loop is ordinary reentrancy.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::{ActorRef, BusySnapshot};

/// A node of the wait-for graph. `External` stands for callers outside the actor graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GraphNode {
    External,
    Actor(ActorRef),
}

impl GraphNode {
    pub fn actor(&self) -> Option<&ActorRef> {
        match self {
            GraphNode::External => None,
            GraphNode::Actor(actor) => Some(actor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEdge {
    /// `None` for an edge out of the external caller.
    pub src_actor: Option<ActorRef>,
    pub dst_actor: ActorRef,
    pub request_id: String,
    pub flow_id: String,
    pub request_value: Value,
    pub parent_value: Value,
}

#[derive(Debug, Default)]
pub struct WaitForGraph {
    /// Outgoing edges per node, keyed by request id for a stable walk order.
    edges: BTreeMap<GraphNode, BTreeMap<String, WaitEdge>>,
}

impl WaitForGraph {
    pub fn from_snapshot(snapshot: &BusySnapshot) -> Self {
        let mut graph = Self::default();

        for (request_id, sent) in &snapshot.actor_sent {
            let parent_id = &sent.parent_request_id;
            let Some(parent) = snapshot.actor_handling.get(parent_id) else {
                continue;
            };

            // Root-level parents hang off the external node, under the child's flow.
            if snapshot.is_root_level(parent_id) {
                graph
                    .edges
                    .entry(GraphNode::External)
                    .or_default()
                    .entry(parent_id.clone())
                    .or_insert_with(|| WaitEdge {
                        src_actor: None,
                        dst_actor: parent.actor.clone(),
                        request_id: parent_id.clone(),
                        flow_id: sent.flow_id.clone(),
                        request_value: parent.request_value.clone(),
                        parent_value: Value::Null,
                    });
            }

            graph
                .edges
                .entry(GraphNode::Actor(parent.actor.clone()))
                .or_default()
                .insert(
                    request_id.clone(),
                    WaitEdge {
                        src_actor: Some(parent.actor.clone()),
                        dst_actor: sent.actor.clone(),
                        request_id: request_id.clone(),
                        flow_id: sent.flow_id.clone(),
                        request_value: sent.request_value.clone(),
                        parent_value: parent.request_value.clone(),
                    },
                );
        }

        graph
    }

    pub fn edges_from(&self, node: &GraphNode) -> impl Iterator<Item = &WaitEdge> {
        self.edges.get(node).into_iter().flat_map(|edges| edges.values())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    /// Depth-first search from the external node. Returns the edges of the first
    /// non-reentrant cycle found, starting at the repeated actor.
    pub fn find_deadlock(&self) -> Option<Vec<WaitEdge>> {
        self.search(&GraphNode::External, Vec::new())
    }

    fn search<'a>(&'a self, node: &GraphNode, path: Vec<&'a WaitEdge>) -> Option<Vec<WaitEdge>> {
        for edge in self.edges_from(node) {
            let repeated = path.iter().position(|seen| seen.dst_actor == edge.dst_actor);
            if let Some(start) = repeated {
                if path[start].flow_id == edge.flow_id {
                    continue;
                }
                let mut cycle: Vec<WaitEdge> =
                    path[start + 1..].iter().map(|e| (*e).clone()).collect();
                cycle.push(edge.clone());
                return Some(cycle);
            }

            let mut next = path.clone();
            next.push(edge);
            if let Some(cycle) = self.search(&GraphNode::Actor(edge.dst_actor.clone()), next) {
                return Some(cycle);
            }
        }
        None
    }
}

/// Convenience wrapper: build the graph and search it.
pub fn detect_deadlock(snapshot: &BusySnapshot) -> Option<Vec<WaitEdge>> {
    WaitForGraph::from_snapshot(snapshot).find_deadlock()
}
