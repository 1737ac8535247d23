use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ActorRef;

/// Actor `actor` is currently executing the keyed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlingEntry {
    pub actor: ActorRef,
    #[serde(default)]
    pub request_value: Value,
}

/// While handling `parent_request_id`, some actor sent the keyed request to `actor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentEntry {
    pub actor: ActorRef,
    #[serde(rename = "parentId", default)]
    pub parent_request_id: String,
    #[serde(default)]
    pub request_value: Value,
    #[serde(default)]
    pub flow_id: String,
}

/// Point-in-time view of every in-flight request in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusySnapshot {
    #[serde(default)]
    pub actor_handling: BTreeMap<String, HandlingEntry>,
    #[serde(default)]
    pub actor_sent: BTreeMap<String, SentEntry>,
}

impl BusySnapshot {
    /// Sent requests that are not themselves the parent of another sent request.
    pub fn leaf_requests(&self) -> impl Iterator<Item = (&String, &SentEntry)> {
        let parents: BTreeSet<&str> = self
            .actor_sent
            .values()
            .map(|entry| entry.parent_request_id.as_str())
            .collect();
        self.actor_sent
            .iter()
            .filter(move |(id, _)| !parents.contains(id.as_str()))
    }

    /// A request with no `actor_sent` entry was issued from outside the actor graph.
    pub fn is_root_level(&self, request_id: &str) -> bool {
        !self.actor_sent.contains_key(request_id)
    }

    /// The actor `request_id` was sent to, or for a root-level request the actor handling it.
    pub fn actor_for(&self, request_id: &str) -> Option<&ActorRef> {
        self.actor_sent
            .get(request_id)
            .map(|entry| &entry.actor)
            .or_else(|| self.actor_handling.get(request_id).map(|entry| &entry.actor))
    }

    pub fn request_value(&self, request_id: &str) -> Option<&Value> {
        self.actor_sent
            .get(request_id)
            .map(|entry| &entry.request_value)
            .or_else(|| {
                self.actor_handling
                    .get(request_id)
                    .map(|entry| &entry.request_value)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.actor_handling.is_empty() && self.actor_sent.is_empty()
    }
}
