use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{empty_as_none, lenient_bool, ActorRef, Phase};

/// How far a breakpoint hit is meant to spread. Only `Global` has coordinator-side
/// meaning today; the others are carried through to the node and back unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointScope {
    #[default]
    Global,
    Node,
    Actor,
    Suicide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub breakpoint_id: String,
    #[serde(rename = "breakpointType", default)]
    pub scope: BreakpointScope,
    #[serde(default)]
    pub actor_type: String,
    /// `None` matches every instance of `actor_type`.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "isRequest", default)]
    pub trigger_phase: Phase,
    #[serde(rename = "nodes", default)]
    pub installed_nodes: BTreeSet<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub delete_on_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_actor: Option<ActorRef>,
    #[serde(default)]
    pub num_paused_actors: u32,
}

impl Breakpoint {
    /// Record one more direct pause; the first concurrent tripper becomes `hit_actor`.
    pub fn record_direct_pause(&mut self, actor: &ActorRef) {
        if self.num_paused_actors == 0 || self.hit_actor.is_none() {
            self.hit_actor = Some(actor.clone());
        }
        self.num_paused_actors = self.num_paused_actors.saturating_add(1);
    }

    /// Drop one direct pause, clearing `hit_actor` when the last one goes.
    pub fn release_direct_pause(&mut self) {
        self.num_paused_actors = self.num_paused_actors.saturating_sub(1);
        if self.num_paused_actors == 0 {
            self.hit_actor = None;
        }
    }
}
