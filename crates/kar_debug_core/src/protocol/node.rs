use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{
    lenient_bool, ActorRef, Breakpoint, BreakpointScope, BusySnapshot, PauseRecord, Phase,
};

/// Which actors an `unpause` releases. All fields empty means every paused actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpauseTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl UnpauseTarget {
    pub fn actor(actor: &ActorRef) -> Self {
        Self {
            actor_type: Some(actor.actor_type.clone()),
            actor_id: Some(actor.actor_id.clone()),
            node_id: None,
        }
    }

    pub fn everything() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRequest {
    #[serde(default)]
    pub breakpoint_id: String,
    #[serde(default)]
    pub actor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "isRequest", default)]
    pub trigger_phase: Phase,
    #[serde(rename = "breakpointType", default)]
    pub scope: BreakpointScope,
    /// Empty installs on every node.
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub delete_on_hit: bool,
    /// Request-phase condition, evaluated by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_conds: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsetBreakpointRequest {
    pub breakpoint_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload of the `kar *` commands, forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassthroughArgs {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Commands the coordinator sends to the node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command")]
pub enum NodeCommand {
    #[serde(rename = "unpause")]
    Unpause(UnpauseTarget),
    #[serde(rename = "setBreakpoint")]
    SetBreakpoint(BreakpointRequest),
    #[serde(rename = "unsetBreakpoint")]
    UnsetBreakpoint(UnsetBreakpointRequest),
    #[serde(rename = "listBreakpoints")]
    ListBreakpoints,
    #[serde(rename = "listPausedActors")]
    ListPausedActors,
    #[serde(rename = "listBusyActors")]
    ListBusyActors,
    #[serde(rename = "kar invoke")]
    KarInvoke(PassthroughArgs),
    #[serde(rename = "kar rest")]
    KarRest(PassthroughArgs),
    #[serde(rename = "kar get")]
    KarGet(PassthroughArgs),
}

impl NodeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::Unpause(_) => "unpause",
            NodeCommand::SetBreakpoint(_) => "setBreakpoint",
            NodeCommand::UnsetBreakpoint(_) => "unsetBreakpoint",
            NodeCommand::ListBreakpoints => "listBreakpoints",
            NodeCommand::ListPausedActors => "listPausedActors",
            NodeCommand::ListBusyActors => "listBusyActors",
            NodeCommand::KarInvoke(_) => "kar invoke",
            NodeCommand::KarRest(_) => "kar rest",
            NodeCommand::KarGet(_) => "kar get",
        }
    }
}

/// A command plus the correlation id its reply will carry.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    #[serde(rename = "commandId", skip_serializing_if = "Option::is_none")]
    pub command_id: Option<&'a str>,
    #[serde(flatten)]
    pub command: &'a NodeCommand,
}

/// Everything the node sends us.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
pub enum NodeEvent {
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        command_id: Option<String>,
        #[serde(default)]
        message: String,
    },
    #[serde(rename = "unpause", rename_all = "camelCase")]
    Unpause {
        command_id: Option<String>,
        #[serde(flatten)]
        actor: ActorRef,
        #[serde(rename = "srcNodeId", default)]
        node_id: String,
    },
    #[serde(rename = "notifyPause")]
    NotifyPause(PauseRecord),
    #[serde(rename = "notifyBreakpoint")]
    NotifyBreakpoint(PauseRecord),
    #[serde(rename = "setBreakpoint", rename_all = "camelCase")]
    SetBreakpoint {
        command_id: Option<String>,
        #[serde(flatten)]
        breakpoint: Breakpoint,
    },
    #[serde(rename = "unsetBreakpoint", rename_all = "camelCase")]
    UnsetBreakpoint {
        command_id: Option<String>,
        breakpoint_id: String,
        #[serde(default)]
        nodes: Vec<String>,
    },
    #[serde(rename = "listBreakpoints", rename_all = "camelCase")]
    ListBreakpoints {
        command_id: Option<String>,
        #[serde(default)]
        breakpoints: BTreeMap<String, Breakpoint>,
    },
    #[serde(rename = "listPausedActors", rename_all = "camelCase")]
    ListPausedActors {
        command_id: Option<String>,
        #[serde(rename = "actorsList", default)]
        actors: Vec<PauseRecord>,
    },
    #[serde(rename = "listBusyActors", rename_all = "camelCase")]
    ListBusyActors {
        command_id: Option<String>,
        #[serde(rename = "busyInfo", default)]
        snapshot: BusySnapshot,
    },
    #[serde(rename = "kar invoke", rename_all = "camelCase")]
    KarInvoke { command_id: Option<String> },
    #[serde(rename = "kar rest", rename_all = "camelCase")]
    KarRest { command_id: Option<String> },
    #[serde(rename = "kar get", rename_all = "camelCase")]
    KarGet { command_id: Option<String> },
}

impl NodeEvent {
    pub fn decode(message: &Value) -> serde_json::Result<Self> {
        NodeEvent::deserialize(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeEvent::Error { .. } => "error",
            NodeEvent::Unpause { .. } => "unpause",
            NodeEvent::NotifyPause(_) => "notifyPause",
            NodeEvent::NotifyBreakpoint(_) => "notifyBreakpoint",
            NodeEvent::SetBreakpoint { .. } => "setBreakpoint",
            NodeEvent::UnsetBreakpoint { .. } => "unsetBreakpoint",
            NodeEvent::ListBreakpoints { .. } => "listBreakpoints",
            NodeEvent::ListPausedActors { .. } => "listPausedActors",
            NodeEvent::ListBusyActors { .. } => "listBusyActors",
            NodeEvent::KarInvoke { .. } => "kar invoke",
            NodeEvent::KarRest { .. } => "kar rest",
            NodeEvent::KarGet { .. } => "kar get",
        }
    }
}

/// True if `reply` is the node's error event.
pub fn is_error_reply(reply: &Value) -> bool {
    reply.get("command").and_then(Value::as_str) == Some("error")
}
