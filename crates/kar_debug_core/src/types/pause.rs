use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ActorRef;

/// Whether a breakpoint fires (or an actor is held) on the incoming request or on the
/// response it is about to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Request,
    Response,
}

/// Why an actor is blocked. Depth 0 means a breakpoint holds it directly; depth N means it
/// waits on a chain of N calls ending at `root_actor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRecord {
    #[serde(flatten)]
    pub actor: ActorRef,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub request_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_value: Option<Value>,
    #[serde(rename = "isResponse", default)]
    pub phase: Phase,
    #[serde(default)]
    pub breakpoint_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub flow_id: String,
    #[serde(default)]
    pub pause_depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_actor: Option<ActorRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_actor: Option<ActorRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_request_id: Option<String>,
    #[serde(default)]
    pub can_step: bool,
}

impl PauseRecord {
    pub fn is_direct(&self) -> bool {
        self.pause_depth == 0
    }

    pub fn is_response_phase(&self) -> bool {
        self.phase == Phase::Response
    }

    /// The directly paused actor at the bottom of this record's wait chain.
    pub fn root(&self) -> &ActorRef {
        self.root_actor.as_ref().unwrap_or(&self.actor)
    }

    pub fn request_info(&self) -> Option<RequestInfo> {
        request_info(&self.request_value)
    }
}

/// The parts of an opaque request payload that queries filter on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Invocation kind, e.g. `call` or `tell`.
    pub kind: String,
    /// Method path with the leading `/` stripped.
    pub method: String,
}

/// Request values arrive either as a JSON object or as a JSON-encoded string of one.
pub fn request_info(value: &Value) -> Option<RequestInfo> {
    let decoded;
    let object = match value {
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw).ok()?;
            decoded.as_object()?
        }
        Value::Object(map) => map,
        _ => return None,
    };

    let kind = object
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let method = object
        .get("path")
        .and_then(Value::as_str)
        .map(|p| p.trim_start_matches('/'))
        .unwrap_or_default()
        .to_string();

    Some(RequestInfo { kind, method })
}
