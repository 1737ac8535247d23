use std::collections::HashSet;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::{with_timeout, DebugContext};
use crate::deadlock::detect_deadlock;
use crate::error::DebuggerError;
use crate::protocol::{
    local_reply, peek_command_id, read_client_frame, write_client_frame, ClientCommand,
    ClientFrame, NodeCommand,
};
use crate::step::StepSession;
use crate::types::BusySnapshot;
use crate::Result;

/// One debugger-client connection.
///
/// Frames are handled strictly one at a time. Forwarded commands block the session until
/// the node answers; local queries are answered from the store. Without `keepAlive` the
/// connection is closed after the first reply.
pub struct ClientSession<S> {
    stream: S,
    ctx: DebugContext,
    peer: String,
    replies_tx: mpsc::UnboundedSender<Value>,
    replies_rx: mpsc::UnboundedReceiver<Value>,
    /// Command ids this session registered, released when it ends.
    registered: HashSet<String>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, ctx: DebugContext, peer: impl Into<String>) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            stream,
            ctx,
            peer: peer.into(),
            replies_tx,
            replies_rx,
            registered: HashSet::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!(peer = %self.peer, "Debugger client connected");
        let outcome = self.serve().await;
        for command_id in self.registered.drain() {
            self.ctx.registry.remove(&command_id).await;
        }
        match &outcome {
            Ok(()) => info!(peer = %self.peer, "Debugger client disconnected"),
            Err(e) => warn!(peer = %self.peer, "Debugger client session ended: {}", e),
        }
        outcome
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let bytes = match read_client_frame(&mut self.stream).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Ok(()),
                Err(e @ DebuggerError::Frame(_)) => {
                    // The stream cannot be resynchronized after a bad length prefix.
                    write_client_frame(&mut self.stream, &e.to_reply(None)).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let frame = match ClientFrame::decode(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer = %self.peer, "Rejecting client frame: {}", e);
                    let command_id = peek_command_id(&bytes);
                    write_client_frame(&mut self.stream, &e.to_reply(command_id.as_deref()))
                        .await?;
                    continue;
                }
            };

            let keep_alive = frame.keep_alive;
            let command_id = frame.command_id.clone();
            let reply = match self.handle(frame).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(peer = %self.peer, command_id = %command_id, "Command failed: {}", e);
                    e.to_reply(Some(&command_id))
                }
            };
            write_client_frame(&mut self.stream, &reply).await?;

            if !keep_alive {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, frame: ClientFrame) -> Result<Value> {
        let ClientFrame {
            command_id,
            keep_alive,
            no_reply,
            command,
        } = frame;
        debug!(peer = %self.peer, command_id = %command_id, command = command.name(), "<- client");

        match command.into_node_command() {
            Ok(node_command) => {
                self.forward(&command_id, keep_alive, no_reply, node_command)
                    .await
            }
            Err(local) => self.answer_locally(&command_id, local).await,
        }
    }

    async fn forward(
        &mut self,
        command_id: &str,
        keep_alive: bool,
        no_reply: bool,
        command: NodeCommand,
    ) -> Result<Value> {
        let command = match command {
            NodeCommand::SetBreakpoint(mut request) if request.breakpoint_id.is_empty() => {
                request.breakpoint_id = format!("bk-{}", uuid::Uuid::new_v4());
                NodeCommand::SetBreakpoint(request)
            }
            other => other,
        };

        self.ctx
            .registry
            .register_session(command_id, self.replies_tx.clone(), keep_alive)
            .await;
        self.registered.insert(command_id.to_string());
        if let Err(e) = self.ctx.node.send(Some(command_id), &command).await {
            self.ctx.registry.remove(command_id).await;
            self.registered.remove(command_id);
            return Err(e);
        }

        if no_reply {
            return Ok(local_reply(command_id, "status", json!("forwarded")));
        }
        let reply = self.await_reply(command_id).await;
        if reply.is_err() && !keep_alive {
            self.ctx.registry.remove(command_id).await;
        }
        reply
    }

    /// Wait for the reply to `command_id`. Late replies to this session's earlier
    /// commands are passed through to the client as they arrive.
    async fn await_reply(&mut self, command_id: &str) -> Result<Value> {
        let limit = self.ctx.config.round_trip_timeout;
        let Self {
            stream, replies_rx, ..
        } = self;
        let wait = async {
            while let Some(reply) = replies_rx.recv().await {
                if reply.get("commandId").and_then(Value::as_str) == Some(command_id) {
                    return Ok(reply);
                }
                write_client_frame(stream, &reply).await?;
            }
            Err(DebuggerError::ChannelClosed(command_id.to_string()))
        };
        with_timeout(limit, command_id, wait).await?
    }

    async fn answer_locally(&mut self, command_id: &str, command: ClientCommand) -> Result<Value> {
        let store = &self.ctx.store;
        match command {
            ClientCommand::ViewBreakpoint {
                breakpoint_id: Some(breakpoint_id),
            } => {
                let breakpoint = store
                    .breakpoint(&breakpoint_id)
                    .await
                    .ok_or(DebuggerError::BreakpointNotFound(breakpoint_id))?;
                Ok(local_reply(
                    command_id,
                    "breakpoint",
                    serde_json::to_value(breakpoint)?,
                ))
            }
            ClientCommand::ViewBreakpoint {
                breakpoint_id: None,
            } => {
                let breakpoints = store.breakpoints().await;
                Ok(local_reply(
                    command_id,
                    "breakpoints",
                    serde_json::to_value(breakpoints)?,
                ))
            }
            ClientCommand::ViewPausedActor(filter) => {
                if filter.include_indirect {
                    self.ctx.refresh_busy().await?;
                }
                let actors = store
                    .paused_actors(&filter, self.ctx.evaluator.as_ref())
                    .await;
                Ok(local_reply(command_id, "actors", serde_json::to_value(actors)?))
            }
            ClientCommand::ViewDeadlocks => {
                self.ctx.refresh_busy().await?;
                let snapshot = store.busy_snapshot().await;
                let cycle = detect_deadlock(&snapshot).unwrap_or_default();
                if !cycle.is_empty() {
                    info!(edges = cycle.len(), "Deadlock detected");
                }
                Ok(local_reply(command_id, "deadlock", serde_json::to_value(cycle)?))
            }
            ClientCommand::ViewRequest { request_id } => {
                self.ctx.refresh_busy().await?;
                let snapshot = store.busy_snapshot().await;
                Ok(local_reply(
                    command_id,
                    "request",
                    request_details(&snapshot, &request_id),
                ))
            }
            ClientCommand::Step(actor) => {
                let landed = StepSession::new(&self.ctx, command_id, actor).run().await?;
                Ok(local_reply(command_id, "step", landed))
            }
            forwarded => Err(DebuggerError::UnknownCommand(forwarded.name().to_string())),
        }
    }
}

/// What the busy snapshot knows about one in-flight request, or `null`.
fn request_details(snapshot: &BusySnapshot, request_id: &str) -> Value {
    let is_handling = snapshot.actor_handling.contains_key(request_id);
    if let Some(sent) = snapshot.actor_sent.get(request_id) {
        return json!({
            "requestId": request_id,
            "actor": sent.actor,
            "parentId": sent.parent_request_id,
            "requestValue": sent.request_value,
            "flowId": sent.flow_id,
            "isHandling": is_handling,
        });
    }
    match snapshot.actor_handling.get(request_id) {
        Some(handling) => json!({
            "requestId": request_id,
            "actor": handling.actor,
            "requestValue": handling.request_value,
            "isHandling": true,
        }),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebuggerConfig;
    use crate::testing::{b_waits_on_c, harness, pause_event, Harness};
    use crate::types::fixtures::SnapshotBuilder;
    use crate::types::ActorRef;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;

    struct Client {
        stream: DuplexStream,
    }

    impl Client {
        async fn send(&mut self, frame: Value) {
            write_client_frame(&mut self.stream, &frame)
                .await
                .expect("write client frame");
        }

        async fn recv(&mut self) -> Option<Value> {
            read_client_frame(&mut self.stream)
                .await
                .expect("read client frame")
                .map(|bytes| serde_json::from_slice(&bytes).expect("reply is JSON"))
        }

        async fn call(&mut self, frame: Value) -> Value {
            self.send(frame).await;
            self.recv().await.expect("reply expected")
        }
    }

    fn connect(h: &Harness) -> (Client, JoinHandle<Result<()>>) {
        let (client, server) = duplex(256 * 1024);
        let session = ClientSession::new(server, h.ctx.clone(), "test-client");
        (Client { stream: client }, tokio::spawn(session.run()))
    }

    #[tokio::test]
    async fn test_set_then_view_breakpoint() {
        let mut h = harness(DebuggerConfig::default()).await;
        let (mut client, session) = connect(&h);

        client
            .send(json!({
                "commandId": "c1",
                "command": "setBreakpoint",
                "keepAlive": true,
                "actorType": "Site",
                "path": "/siteReport",
            }))
            .await;
        let mut install = h.node.recv().await;
        assert_eq!(install["commandId"], "c1");
        let breakpoint_id = install["breakpointId"].as_str().unwrap().to_string();
        assert!(breakpoint_id.starts_with("bk-"));
        install["nodes"] = json!(["node-a", "node-b"]);
        h.node.emit(install).await;

        let ack = client.recv().await.unwrap();
        assert_eq!(ack["command"], "setBreakpoint");
        assert_eq!(ack["commandId"], "c1");

        let one = client
            .call(json!({
                "commandId": "c2",
                "command": "viewBreakpoint",
                "keepAlive": true,
                "breakpointId": breakpoint_id,
            }))
            .await;
        assert_eq!(one["breakpoint"]["nodes"], json!(["node-a", "node-b"]));

        let missing = client
            .call(json!({
                "commandId": "c3",
                "command": "viewBreakpoint",
                "keepAlive": true,
                "breakpointId": "nope",
            }))
            .await;
        assert_eq!(missing["commandId"], "c3");
        assert_eq!(missing["error"]["kind"], "domain");

        let all = client
            .call(json!({"commandId": "c4", "command": "viewBreakpoint"}))
            .await;
        assert_eq!(all["breakpoints"].as_array().unwrap().len(), 1);

        // No keepAlive on the last frame: the session closes.
        assert!(client.recv().await.is_none());
        session.await.unwrap().unwrap();
        assert!(h.ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_protocol_error_does_not_end_session() {
        let mut h = harness(DebuggerConfig::default()).await;
        let (mut client, _session) = connect(&h);

        let rejected = client
            .call(json!({"commandId": "c1", "command": "frobnicate"}))
            .await;
        assert_eq!(rejected["commandId"], "c1");
        assert_eq!(rejected["error"]["kind"], "protocol");

        client
            .send(json!({"commandId": "c2", "command": "viewDeadlocks"}))
            .await;
        let a = ActorRef::new("A", "1");
        let snapshot = SnapshotBuilder::default()
            .root("r0", &a)
            .call("r1", "r0", &ActorRef::new("B", "1"), "f1")
            .call("r2", "r1", &ActorRef::new("C", "1"), "f1")
            .call("r3", "r2", &a, "f2")
            .build();
        h.node.answer_busy(snapshot).await;
        let deadlock = client.recv().await.unwrap();
        let edges = deadlock["deadlock"].as_array().unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[2]["requestId"], "r3");
    }

    #[tokio::test]
    async fn test_view_paused_including_indirect() {
        let mut h = harness(DebuggerConfig::default()).await;
        h.node.emit(pause_event("C", "1", "request")).await;
        let (mut client, _session) = connect(&h);

        client
            .send(json!({
                "commandId": "c1",
                "command": "viewPausedActor",
                "ind": "true",
            }))
            .await;
        h.node.answer_busy(b_waits_on_c()).await;

        let reply = client.recv().await.unwrap();
        let actors = reply["actors"].as_array().unwrap();
        assert_eq!(actors.len(), 2);
        assert_eq!(actors[0]["actorType"], "B");
        assert_eq!(actors[0]["pauseDepth"], 1);
        assert_eq!(actors[1]["actorType"], "C");
    }

    #[tokio::test]
    async fn test_view_request_and_passthrough() {
        let mut h = harness(DebuggerConfig::default()).await;
        let (mut client, _session) = connect(&h);

        client
            .send(json!({
                "commandId": "c1",
                "command": "viewRequest",
                "keepAlive": true,
                "requestId": "r1",
            }))
            .await;
        h.node.answer_busy(b_waits_on_c()).await;
        let details = client.recv().await.unwrap();
        assert_eq!(details["request"]["parentId"], "r0");
        assert_eq!(details["request"]["actor"]["actorType"], "C");
        assert_eq!(details["request"]["isHandling"], true);

        client
            .send(json!({
                "commandId": "c2",
                "command": "kar get",
                "subsystem": "actors",
            }))
            .await;
        let forwarded = h.node.recv().await;
        assert_eq!(forwarded["command"], "kar get");
        assert_eq!(forwarded["subsystem"], "actors");
        h.node
            .emit(json!({"command": "kar get", "commandId": "c2", "result": {"Site": ["1"]}}))
            .await;
        let reply = client.recv().await.unwrap();
        assert_eq!(reply["result"]["Site"][0], "1");
    }

    #[tokio::test]
    async fn test_no_reply_is_acknowledged_locally() {
        let mut h = harness(DebuggerConfig::default()).await;
        let (mut client, session) = connect(&h);

        let reply = client
            .call(json!({"commandId": "c1", "command": "unpause", "noReply": true}))
            .await;
        assert_eq!(reply, json!({"commandId": "c1", "status": "forwarded"}));
        assert_eq!(h.node.recv().await["command"], "unpause");

        session.await.unwrap().unwrap();
        assert!(!h.ctx.registry.contains("c1").await);
    }

    #[tokio::test]
    async fn test_disconnect_releases_registrations() {
        let mut h = harness(DebuggerConfig::default()).await;
        let (mut client, session) = connect(&h);

        client
            .send(json!({"commandId": "c1", "command": "kar invoke", "keepAlive": true}))
            .await;
        h.node.recv().await;
        assert!(h.ctx.registry.contains("c1").await);
        drop(client);

        h.node
            .emit(json!({"command": "kar invoke", "commandId": "c1", "value": 1}))
            .await;
        assert!(session.await.unwrap().is_err());
        assert!(h.ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_step_through_session() {
        let mut h = harness(DebuggerConfig::default()).await;
        h.node.emit(pause_event("Site", "1", "request")).await;
        let (mut client, _session) = connect(&h);

        client
            .send(json!({
                "commandId": "c-step",
                "command": "step",
                "actorType": "Site",
                "actorId": "1",
            }))
            .await;
        h.node.answer_busy(BusySnapshot::default()).await;
        let install = h.node.recv().await;
        h.node.emit(install.clone()).await;
        assert_eq!(h.node.recv().await["command"], "unpause");

        let mut hit = pause_event("Site", "1", "response");
        hit["command"] = json!("notifyBreakpoint");
        hit["breakpointId"] = install["breakpointId"].clone();
        h.node.emit(hit).await;

        let reply = client.recv().await.unwrap();
        assert_eq!(reply["commandId"], "c-step");
        assert_eq!(reply["step"]["breakpointId"], install["breakpointId"]);
    }

    #[test]
    fn test_request_details_for_unknown_id() {
        assert_eq!(request_details(&BusySnapshot::default(), "r9"), Value::Null);
    }
}
