use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::node::{
    BreakpointRequest, NodeCommand, PassthroughArgs, UnpauseTarget, UnsetBreakpointRequest,
};
use crate::error::DebuggerError;
use crate::filter::PauseFilter;
use crate::types::{empty_as_none, lenient_bool, ActorRef};
use crate::Result;

const CLIENT_COMMANDS: &[&str] = &[
    "unpause",
    "setBreakpoint",
    "unsetBreakpoint",
    "kar invoke",
    "kar rest",
    "kar get",
    "viewDeadlocks",
    "viewBreakpoint",
    "viewPausedActor",
    "viewRequest",
    "step",
];

/// One command record from a debugger client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub command_id: String,
    /// Keep the connection open for another frame after replying.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub keep_alive: bool,
    /// Forward without waiting for the node's reply.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub no_reply: bool,
    #[serde(flatten)]
    pub command: ClientCommand,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
pub enum ClientCommand {
    #[serde(rename = "unpause")]
    Unpause(UnpauseTarget),
    #[serde(rename = "setBreakpoint")]
    SetBreakpoint(BreakpointRequest),
    #[serde(rename = "unsetBreakpoint")]
    UnsetBreakpoint(UnsetBreakpointRequest),
    #[serde(rename = "kar invoke")]
    KarInvoke(PassthroughArgs),
    #[serde(rename = "kar rest")]
    KarRest(PassthroughArgs),
    #[serde(rename = "kar get")]
    KarGet(PassthroughArgs),
    #[serde(rename = "viewDeadlocks")]
    ViewDeadlocks,
    /// Without an id, lists every breakpoint.
    #[serde(rename = "viewBreakpoint", rename_all = "camelCase")]
    ViewBreakpoint {
        #[serde(default, deserialize_with = "empty_as_none")]
        breakpoint_id: Option<String>,
    },
    #[serde(rename = "viewPausedActor")]
    ViewPausedActor(PauseFilter),
    #[serde(rename = "viewRequest", rename_all = "camelCase")]
    ViewRequest { request_id: String },
    #[serde(rename = "step")]
    Step(ActorRef),
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Unpause(_) => "unpause",
            ClientCommand::SetBreakpoint(_) => "setBreakpoint",
            ClientCommand::UnsetBreakpoint(_) => "unsetBreakpoint",
            ClientCommand::KarInvoke(_) => "kar invoke",
            ClientCommand::KarRest(_) => "kar rest",
            ClientCommand::KarGet(_) => "kar get",
            ClientCommand::ViewDeadlocks => "viewDeadlocks",
            ClientCommand::ViewBreakpoint { .. } => "viewBreakpoint",
            ClientCommand::ViewPausedActor(_) => "viewPausedActor",
            ClientCommand::ViewRequest { .. } => "viewRequest",
            ClientCommand::Step(_) => "step",
        }
    }

    /// The node command for commands that are forwarded rather than answered locally.
    pub fn into_node_command(self) -> std::result::Result<NodeCommand, Self> {
        match self {
            ClientCommand::Unpause(target) => Ok(NodeCommand::Unpause(target)),
            ClientCommand::SetBreakpoint(request) => Ok(NodeCommand::SetBreakpoint(request)),
            ClientCommand::UnsetBreakpoint(request) => Ok(NodeCommand::UnsetBreakpoint(request)),
            ClientCommand::KarInvoke(args) => Ok(NodeCommand::KarInvoke(args)),
            ClientCommand::KarRest(args) => Ok(NodeCommand::KarRest(args)),
            ClientCommand::KarGet(args) => Ok(NodeCommand::KarGet(args)),
            local => Err(local),
        }
    }
}

impl ClientFrame {
    /// Decode a frame body, classifying what is wrong with it when it does not parse.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let object = value
            .as_object()
            .ok_or_else(|| DebuggerError::frame("command frame must be a JSON object"))?;

        if !object.get("commandId").is_some_and(Value::is_string) {
            return Err(DebuggerError::MissingField("commandId"));
        }
        let name = object
            .get("command")
            .and_then(Value::as_str)
            .ok_or(DebuggerError::MissingField("command"))?;
        if !CLIENT_COMMANDS.contains(&name) {
            return Err(DebuggerError::UnknownCommand(name.to_string()));
        }

        Ok(ClientFrame::deserialize(&value)?)
    }
}

/// Best-effort `commandId` from a frame that failed to decode.
pub fn peek_command_id(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.get("commandId")?.as_str().map(str::to_string)
}

/// `{"commandId": id, key: body}`
pub fn local_reply(command_id: &str, key: &str, body: Value) -> Value {
    let mut reply = Map::new();
    reply.insert("commandId".into(), json!(command_id));
    reply.insert(key.into(), body);
    Value::Object(reply)
}
