use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::ActorRef;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("No pending request for command id {0}")]
    UnknownCommandId(String),

    #[error("Node link closed")]
    NodeLinkClosed,

    #[error("Reply channel closed while waiting for {0}")]
    ChannelClosed(String),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("Breakpoint {0} not found")]
    BreakpointNotFound(String),

    #[error("Actor {0} is not paused")]
    ActorNotPaused(ActorRef),

    #[error("Cannot step: actor {0} is paused on a response")]
    StepOnResponse(ActorRef),

    #[error("Cannot step: actor {0} is only indirectly paused")]
    StepOnIndirectPause(ActorRef),

    #[error("Cannot step: no method path in the request actor {0} is paused on")]
    StepWithoutMethod(ActorRef),

    #[error("Node rejected command: {0}")]
    NodeRejected(String),
}

/// Coarse classification reported to debugger clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Protocol,
    Correlation,
    Link,
    Domain,
    Timeout,
}

impl DebuggerError {
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Json(_) | Self::Frame(_) | Self::MissingField(_) | Self::UnknownCommand(_) => {
                ErrorKind::Protocol
            }
            Self::UnknownCommandId(_) => ErrorKind::Correlation,
            Self::Io(_) | Self::WebSocket(_) | Self::NodeLinkClosed | Self::ChannelClosed(_) => {
                ErrorKind::Link
            }
            Self::Timeout(..) => ErrorKind::Timeout,
            Self::BreakpointNotFound(_)
            | Self::ActorNotPaused(_)
            | Self::StepOnResponse(_)
            | Self::StepOnIndirectPause(_)
            | Self::StepWithoutMethod(_)
            | Self::NodeRejected(_) => ErrorKind::Domain,
        }
    }

    /// Structured error reply sent back to a debugger client.
    pub fn to_reply(&self, command_id: Option<&str>) -> Value {
        json!({
            "commandId": command_id,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}
