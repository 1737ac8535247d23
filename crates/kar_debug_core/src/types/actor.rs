use std::fmt;

use serde::{Deserialize, Serialize};

/// Cluster-wide identity of one actor instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRef {
    #[serde(default)]
    pub actor_type: String,
    #[serde(default)]
    pub actor_id: String,
}

impl ActorRef {
    pub fn new(actor_type: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type: actor_type.into(),
            actor_id: actor_id.into(),
        }
    }

    /// Node-wide events leave both fields empty.
    pub fn is_empty(&self) -> bool {
        self.actor_type.is_empty() && self.actor_id.is_empty()
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.actor_type, self.actor_id)
    }
}
