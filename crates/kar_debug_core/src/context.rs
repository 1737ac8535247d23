use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::DebuggerConfig;
use crate::error::DebuggerError;
use crate::filter::{AcceptAll, ConditionEvaluator};
use crate::node_link::NodeSender;
use crate::protocol::{is_error_reply, NodeCommand};
use crate::registry::PendingRequestRegistry;
use crate::store::StateStore;
use crate::Result;

/// Everything a client session needs, cheap to clone per connection.
#[derive(Clone)]
pub struct DebugContext {
    pub store: Arc<StateStore>,
    pub registry: Arc<PendingRequestRegistry>,
    pub node: NodeSender,
    pub config: Arc<DebuggerConfig>,
    pub evaluator: Arc<dyn ConditionEvaluator>,
}

impl DebugContext {
    pub fn new(
        store: Arc<StateStore>,
        registry: Arc<PendingRequestRegistry>,
        node: NodeSender,
        config: DebuggerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            node,
            config: Arc::new(config),
            evaluator: Arc::new(AcceptAll),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Send `command` under a fresh internal id and wait for the correlated reply.
    /// An `error` reply from the node becomes `NodeRejected`.
    pub async fn round_trip(&self, command: &NodeCommand) -> Result<Value> {
        let command_id = format!("internal-{}", uuid::Uuid::new_v4());
        let rx = self.registry.register_oneshot(&command_id).await;
        if let Err(e) = self.node.send(Some(&command_id), command).await {
            self.registry.remove(&command_id).await;
            return Err(e);
        }

        let what = command.name();
        let reply = match with_timeout(self.config.round_trip_timeout, what, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(DebuggerError::ChannelClosed(what.to_string())),
            Err(e) => {
                self.registry.remove(&command_id).await;
                return Err(e);
            }
        };
        debug!(command = what, command_id = %command_id, "Round trip complete");

        if is_error_reply(&reply) {
            return Err(DebuggerError::NodeRejected(error_message(&reply)));
        }
        Ok(reply)
    }

    /// Pull a fresh busy snapshot; indirect pauses are recomputed before this returns.
    pub async fn refresh_busy(&self) -> Result<()> {
        self.round_trip(&NodeCommand::ListBusyActors).await.map(|_| ())
    }
}

/// Await `future`, bounded by `limit` when one is configured.
pub(crate) async fn with_timeout<F: Future>(
    limit: Option<Duration>,
    what: &str,
    future: F,
) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| DebuggerError::Timeout(limit, what.to_string())),
        None => Ok(future.await),
    }
}

pub(crate) fn error_message(reply: &Value) -> String {
    reply
        .get("message")
        .or_else(|| reply.get("error"))
        .map(|m| match m {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unspecified node error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_times_out_and_cleans_up() {
        let config = DebuggerConfig::default().with_round_trip_timeout(Some(Duration::from_millis(20)));
        let h = harness(config).await;
        let err = h
            .ctx
            .round_trip(&NodeCommand::ListBusyActors)
            .await
            .unwrap_err();
        assert!(matches!(err, DebuggerError::Timeout(_, ref what) if what == "listBusyActors"));
        assert!(h.ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_round_trip_delivers_reply_and_maps_errors() {
        let config = DebuggerConfig::default().with_round_trip_timeout(Some(Duration::from_secs(5)));
        let mut h = harness(config).await;
        let ctx = h.ctx.clone();

        let first = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.round_trip(&NodeCommand::KarGet(Default::default())).await }
        });
        let request = h.node.recv().await;
        assert_eq!(request["command"], "kar get");
        h.node
            .emit(json!({"command": "kar get", "commandId": request["commandId"], "value": 3}))
            .await;
        assert_eq!(first.await.unwrap().unwrap()["value"], 3);

        let second = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.round_trip(&NodeCommand::KarGet(Default::default())).await }
        });
        let request = h.node.recv().await;
        h.node
            .emit(json!({"command": "error", "commandId": request["commandId"], "message": "no such actor"}))
            .await;
        let err = second.await.unwrap().unwrap_err();
        assert!(matches!(err, DebuggerError::NodeRejected(ref m) if m == "no such actor"));
        assert!(ctx.registry.is_empty().await);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(&json!({"message": "boom"})), "boom");
        assert_eq!(error_message(&json!({"error": {"code": 1}})), "{\"code\":1}");
        assert_eq!(error_message(&json!({})), "unspecified node error");
    }
}
