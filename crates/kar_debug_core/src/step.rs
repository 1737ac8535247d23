//! Single-step: let one directly paused actor run until it is about to return.
//!
//! The session owns an ephemeral response-phase breakpoint for its whole life: it is
//! installed, the cluster is unpaused, and the session waits for that breakpoint to fire.
//! The breakpoint is removed again on every exit path.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::{error_message, with_timeout, DebugContext};
use crate::error::DebuggerError;
use crate::protocol::{
    is_error_reply, BreakpointRequest, NodeCommand, UnpauseTarget, UnsetBreakpointRequest,
};
use crate::types::{ActorRef, BreakpointScope, PauseRecord, Phase};
use crate::Result;

pub struct StepSession<'a> {
    ctx: &'a DebugContext,
    command_id: String,
    actor: ActorRef,
}

impl<'a> StepSession<'a> {
    pub fn new(ctx: &'a DebugContext, command_id: impl Into<String>, actor: ActorRef) -> Self {
        Self {
            ctx,
            command_id: command_id.into(),
            actor,
        }
    }

    /// Returns the `notifyBreakpoint` event describing where the actor stopped.
    pub async fn run(self) -> Result<Value> {
        if self.actor.actor_type.is_empty() {
            return Err(DebuggerError::MissingField("actorType"));
        }
        if self.actor.actor_id.is_empty() {
            return Err(DebuggerError::MissingField("actorId"));
        }

        // Refresh first so an indirect pause is reported as such, not as "not paused".
        self.ctx.refresh_busy().await?;
        let record = self.precheck().await?;
        let method = record
            .request_info()
            .map(|info| info.method)
            .filter(|method| !method.is_empty())
            .ok_or_else(|| DebuggerError::StepWithoutMethod(self.actor.clone()))?;

        let breakpoint_id = format!("step-{}", uuid::Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Both registrations precede the install so the hit cannot be missed.
        self.ctx
            .store
            .register_step(&breakpoint_id, &self.command_id)
            .await;
        self.ctx
            .registry
            .register_session(&self.command_id, tx, true)
            .await;

        let outcome = self.drive(&method, &breakpoint_id, &mut rx).await;
        self.finish(&breakpoint_id).await;
        outcome
    }

    async fn precheck(&self) -> Result<PauseRecord> {
        let record = self
            .ctx
            .store
            .pause_of(&self.actor)
            .await
            .ok_or_else(|| DebuggerError::ActorNotPaused(self.actor.clone()))?;
        if !record.is_direct() {
            return Err(DebuggerError::StepOnIndirectPause(self.actor.clone()));
        }
        if record.is_response_phase() {
            return Err(DebuggerError::StepOnResponse(self.actor.clone()));
        }
        Ok(record)
    }

    async fn drive(
        &self,
        method: &str,
        breakpoint_id: &str,
        rx: &mut mpsc::UnboundedReceiver<Value>,
    ) -> Result<Value> {
        let install = NodeCommand::SetBreakpoint(BreakpointRequest {
            breakpoint_id: breakpoint_id.to_string(),
            actor_type: self.actor.actor_type.clone(),
            actor_id: Some(self.actor.actor_id.clone()),
            path: format!("/{method}"),
            trigger_phase: Phase::Response,
            scope: BreakpointScope::Global,
            nodes: Vec::new(),
            delete_on_hit: true,
            conds: None,
            resp_conds: None,
        });
        self.ctx.node.send(Some(&self.command_id), &install).await?;
        await_reply(rx, "setBreakpoint", self.ctx.config.round_trip_timeout, |reply| {
            reply.get("command").and_then(Value::as_str) == Some("setBreakpoint")
        })
        .await?;
        debug!(actor = %self.actor, breakpoint_id, "Step breakpoint installed");

        self.ctx
            .node
            .send(
                Some(&self.command_id),
                &NodeCommand::Unpause(UnpauseTarget::everything()),
            )
            .await?;

        let hit = await_reply(rx, "step completion", self.ctx.config.step_timeout, |reply| {
            reply.get("command").and_then(Value::as_str) == Some("notifyBreakpoint")
                && reply.get("breakpointId").and_then(Value::as_str) == Some(breakpoint_id)
        })
        .await?;
        info!(actor = %self.actor, "Single-step complete");
        Ok(hit)
    }

    async fn finish(&self, breakpoint_id: &str) {
        self.ctx.registry.remove(&self.command_id).await;
        self.ctx.store.clear_step(breakpoint_id).await;
        let remove = NodeCommand::UnsetBreakpoint(UnsetBreakpointRequest {
            breakpoint_id: breakpoint_id.to_string(),
            nodes: Vec::new(),
        });
        if let Err(e) = self.ctx.node.send(None, &remove).await {
            warn!(breakpoint_id, "Failed to remove step breakpoint: {}", e);
        }
    }
}

/// Wait for the first delivery `accept` takes, skipping intermediate acks. A node error
/// under this command id aborts the wait.
async fn await_reply<F>(
    rx: &mut mpsc::UnboundedReceiver<Value>,
    what: &str,
    limit: Option<std::time::Duration>,
    accept: F,
) -> Result<Value>
where
    F: Fn(&Value) -> bool,
{
    let wait = async {
        while let Some(reply) = rx.recv().await {
            if is_error_reply(&reply) {
                return Err(DebuggerError::NodeRejected(error_message(&reply)));
            }
            if accept(&reply) {
                return Ok(reply);
            }
            let kind = reply.get("command").and_then(Value::as_str).unwrap_or("<none>");
            debug!(kind, "Step skipping intermediate reply");
        }
        Err(DebuggerError::ChannelClosed(what.to_string()))
    };
    with_timeout(limit, what, wait).await?
}
