use serde::Deserialize;
use serde_json::Value;

use crate::types::{lenient_bool, PauseRecord, Phase};

/// Post-filter hook for the condition-expression language (`.payload[0].x > 3`, ...).
/// The language lives outside this crate; the coordinator only calls through this seam.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, record: &Value, expression: &str) -> bool;
}

/// Used when no expression language is wired in: every record passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ConditionEvaluator for AcceptAll {
    fn evaluate(&self, _record: &Value, _expression: &str) -> bool {
        true
    }
}

/// Conjunctive exact-match filter for paused-actor queries. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseFilter {
    pub actor_type: Option<String>,
    pub actor_id: Option<String>,
    pub request_id: Option<String>,
    pub method: Option<String>,
    pub request_type: Option<String>,
    pub is_response: Option<Phase>,
    pub breakpoint_id: Option<String>,
    pub node_id: Option<String>,
    #[serde(rename = "ind", default, deserialize_with = "lenient_bool")]
    pub include_indirect: bool,
    pub condition: Option<String>,
}

fn field_matches(wanted: Option<&String>, actual: &str) -> bool {
    wanted.map_or(true, |w| w == actual)
}

impl PauseFilter {
    pub fn matches(&self, record: &PauseRecord) -> bool {
        if !self.include_indirect && !record.is_direct() {
            return false;
        }

        let plain = field_matches(self.actor_type.as_ref(), &record.actor.actor_type)
            && field_matches(self.actor_id.as_ref(), &record.actor.actor_id)
            && field_matches(self.request_id.as_ref(), &record.request_id)
            && field_matches(self.breakpoint_id.as_ref(), &record.breakpoint_id)
            && field_matches(self.node_id.as_ref(), &record.node_id)
            && self.is_response.map_or(true, |phase| phase == record.phase);
        if !plain {
            return false;
        }

        if self.method.is_none() && self.request_type.is_none() {
            return true;
        }
        // A record whose request value cannot be decoded never satisfies a method or kind filter.
        let Some(info) = record.request_info() else {
            return false;
        };
        field_matches(self.method.as_ref(), &info.method)
            && field_matches(self.request_type.as_ref(), &info.kind)
    }

    /// `matches` plus the optional condition expression.
    pub fn accepts(&self, record: &PauseRecord, evaluator: &dyn ConditionEvaluator) -> bool {
        if !self.matches(record) {
            return false;
        }
        match &self.condition {
            Some(expression) => serde_json::to_value(record)
                .map(|value| evaluator.evaluate(&value, expression))
                .unwrap_or(false),
            None => true,
        }
    }
}
