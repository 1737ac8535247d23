//! In-memory node for session and step tests.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{duplex, DuplexStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::config::DebuggerConfig;
use crate::context::DebugContext;
use crate::error::DebuggerError;
use crate::node_link::{NodeLink, NodeSender};
use crate::registry::PendingRequestRegistry;
use crate::store::StateStore;
use crate::types::{ActorRef, BusySnapshot};
use crate::types::fixtures::SnapshotBuilder;

/// The sidecar end of a node link, driven by the test.
pub struct FakeNode {
    socket: WebSocketStream<DuplexStream>,
}

impl FakeNode {
    pub async fn recv(&mut self) -> Value {
        loop {
            let message = self
                .socket
                .next()
                .await
                .expect("coordinator should send a message")
                .expect("valid websocket message");
            if let Message::Text(body) = message {
                return serde_json::from_str(body.as_str()).expect("message is JSON");
            }
        }
    }

    pub async fn emit(&mut self, event: Value) {
        self.socket
            .send(Message::Text(event.to_string().into()))
            .await
            .expect("write event");
    }

    /// Answer a `listBusyActors` request with `snapshot`.
    pub async fn answer_busy(&mut self, snapshot: BusySnapshot) {
        let request = self.recv().await;
        assert_eq!(request["command"], "listBusyActors");
        self.emit(json!({
            "command": "listBusyActors",
            "commandId": request["commandId"],
            "busyInfo": snapshot,
        }))
        .await;
    }
}

pub struct Harness {
    pub ctx: DebugContext,
    pub node: FakeNode,
    pub link: JoinHandle<DebuggerError>,
}

/// A context whose node link runs against a [`FakeNode`].
pub async fn harness(config: DebuggerConfig) -> Harness {
    let (coordinator_side, node_side) = duplex(256 * 1024);
    let link_socket = WebSocketStream::from_raw_socket(coordinator_side, Role::Client, None).await;
    let node_socket = WebSocketStream::from_raw_socket(node_side, Role::Server, None).await;
    let (sink, stream) = link_socket.split();

    let store = Arc::new(StateStore::new());
    let registry = Arc::new(PendingRequestRegistry::new());
    let link = NodeLink::new(stream, store.clone(), registry.clone());
    let ctx = DebugContext::new(store, registry, NodeSender::new(sink), config);

    Harness {
        ctx,
        node: FakeNode {
            socket: node_socket,
        },
        link: tokio::spawn(link.run()),
    }
}

pub fn pause_event(actor_type: &str, actor_id: &str, phase: &str) -> Value {
    json!({
        "command": "notifyPause",
        "actorType": actor_type,
        "actorId": actor_id,
        "requestId": format!("req-{actor_id}"),
        "requestValue": "{\"command\":\"call\",\"path\":\"/siteReport\",\"payload\":\"[]\"}",
        "isResponse": phase,
        "breakpointId": "bk-1",
        "nodeId": "node-a",
        "flowId": "f1",
    })
}

/// `B 1` is handling `r0` and waiting on `r1`, sent to `C 1`.
pub fn b_waits_on_c() -> BusySnapshot {
    SnapshotBuilder::default()
        .root("r0", &ActorRef::new("B", "1"))
        .call("r1", "r0", &ActorRef::new("C", "1"), "f1")
        .build()
}
