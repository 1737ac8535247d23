use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::SplitStream;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::DebuggerConfig;
use crate::engine::PauseBreakpointEngine;
use crate::error::DebuggerError;
use crate::protocol::{NodeCommand, NodeEvent, OutboundFrame};
use crate::registry::PendingRequestRegistry;
use crate::store::StateStore;
use crate::Result;

/// Sidecar endpoint a debugger attaches to.
pub const REGISTER_PATH: &str = "/kar/v1/debug/register";

type BoxedSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Incoming half of a live node connection.
pub type NodeStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Write half of the node link. Cloned into every session; sends are serialized by the
/// inner mutex so messages never interleave.
#[derive(Clone)]
pub struct NodeSender {
    sink: Arc<Mutex<BoxedSink>>,
}

impl fmt::Debug for NodeSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSender").finish_non_exhaustive()
    }
}

impl NodeSender {
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
    {
        let sink: BoxedSink = Box::pin(sink);
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    pub async fn send(&self, command_id: Option<&str>, command: &NodeCommand) -> Result<()> {
        let text = serde_json::to_string(&OutboundFrame {
            command_id,
            command,
        })?;
        debug!(command = command.name(), command_id, "-> node");

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

/// Read half of the node link: the single task that applies node events in order.
pub struct NodeLink<R> {
    stream: R,
    engine: PauseBreakpointEngine,
    registry: Arc<PendingRequestRegistry>,
}

impl NodeLink<NodeStream> {
    /// Open the debug WebSocket on the configured sidecar, identifying as `debugger_id`.
    pub async fn connect(
        config: &DebuggerConfig,
        store: Arc<StateStore>,
        registry: Arc<PendingRequestRegistry>,
    ) -> Result<(Self, NodeSender)> {
        let url = format!("ws://{}{}", config.node_addr, REGISTER_PATH);
        let mut request = url.as_str().into_client_request()?;
        let id = HeaderValue::from_str(&config.debugger_id)
            .map_err(|e| WsError::HttpFormat(e.into()))?;
        request.headers_mut().insert("id", id);

        let (socket, _response) = connect_async(request).await?;
        let (sink, stream) = socket.split();
        info!(url = %url, debugger_id = %config.debugger_id, "Attached to KAR node");
        Ok((
            NodeLink::new(stream, store, registry),
            NodeSender::new(sink),
        ))
    }
}

impl<R> NodeLink<R>
where
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    pub fn new(stream: R, store: Arc<StateStore>, registry: Arc<PendingRequestRegistry>) -> Self {
        Self {
            stream,
            engine: PauseBreakpointEngine::new(store, registry.clone()),
            registry,
        }
    }

    /// Apply node events until the link fails. The returned error is always fatal.
    pub async fn run(mut self) -> DebuggerError {
        loop {
            let text = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    error!(frame = ?frame, "Node closed the debug link");
                    return DebuggerError::NodeLinkClosed;
                }
                Some(Ok(other)) => {
                    debug!(len = other.len(), "Ignoring non-text node message");
                    continue;
                }
                Some(Err(e)) => {
                    error!("Node link failed: {}", e);
                    return e.into();
                }
                None => {
                    error!("Node link closed");
                    return DebuggerError::NodeLinkClosed;
                }
            };
            match serde_json::from_str::<Value>(text.as_str()) {
                Ok(message) => self.dispatch(message).await,
                Err(e) => warn!("Skipping node message with invalid JSON: {}", e),
            }
        }
    }

    pub(crate) async fn dispatch(&self, raw: Value) {
        let event = match NodeEvent::decode(&raw) {
            Ok(event) => event,
            Err(e) => {
                let kind = raw.get("command").and_then(Value::as_str).unwrap_or("<none>");
                warn!(kind, "Skipping node event: {}", e);
                return;
            }
        };
        debug!(kind = event.kind(), "<- node");

        match event {
            NodeEvent::Error {
                command_id,
                message,
            } => {
                warn!(command_id = ?command_id, "Node reported error: {}", message);
                self.route(command_id.as_deref(), raw, false).await;
            }
            NodeEvent::Unpause {
                command_id,
                actor,
                node_id,
            } => {
                self.engine.unpause(&actor, &node_id).await;
                // One unpause request can produce several of these.
                self.route(command_id.as_deref(), raw, true).await;
            }
            NodeEvent::NotifyPause(record) => {
                info!(actor = %record.actor, depth = record.pause_depth, "Actor paused");
                self.engine.notify_pause(record).await;
            }
            NodeEvent::NotifyBreakpoint(record) => {
                self.engine.notify_breakpoint(record, raw).await;
            }
            NodeEvent::SetBreakpoint {
                command_id,
                breakpoint,
            } => {
                self.engine
                    .set_breakpoint(breakpoint, command_id.as_deref())
                    .await;
                self.route(command_id.as_deref(), raw, false).await;
            }
            NodeEvent::UnsetBreakpoint {
                command_id,
                breakpoint_id,
                nodes,
            } => {
                self.engine.unset_breakpoint(&breakpoint_id, &nodes).await;
                self.route(command_id.as_deref(), raw, false).await;
            }
            NodeEvent::ListBreakpoints {
                command_id,
                breakpoints,
            } => {
                info!(count = breakpoints.len(), "Breakpoints resynchronized");
                self.engine.replace_breakpoints(breakpoints).await;
                self.route(command_id.as_deref(), raw, false).await;
            }
            NodeEvent::ListPausedActors { command_id, actors } => {
                info!(count = actors.len(), "Paused actors resynchronized");
                self.engine.replace_paused_actors(actors).await;
                self.route(command_id.as_deref(), raw, false).await;
            }
            NodeEvent::ListBusyActors {
                command_id,
                snapshot,
            } => {
                self.engine.apply_busy_snapshot(snapshot).await;
                self.route(command_id.as_deref(), raw, false).await;
            }
            NodeEvent::KarInvoke { command_id }
            | NodeEvent::KarRest { command_id }
            | NodeEvent::KarGet { command_id } => {
                self.route(command_id.as_deref(), raw, false).await;
            }
        }
    }

    async fn route(&self, command_id: Option<&str>, raw: Value, quiet: bool) {
        let Some(command_id) = command_id else {
            return;
        };
        match self.registry.deliver(command_id, raw).await {
            Ok(()) => {}
            Err(e) if quiet => debug!(command_id, "Dropping reply: {}", e),
            Err(e) => warn!(command_id, "Dropping reply: {}", e),
        }
    }
}

/// Pull full snapshots of breakpoints and paused actors. The replies are applied by the
/// reader loop like any other event.
pub async fn resynchronize(sender: &NodeSender) -> Result<()> {
    sender.send(None, &NodeCommand::ListBreakpoints).await?;
    sender.send(None, &NodeCommand::ListPausedActors).await?;
    Ok(())
}
