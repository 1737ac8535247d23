use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::DebuggerError;
use crate::Result;

/// Where a correlated node reply goes.
#[derive(Debug)]
pub enum DeliveryTarget {
    /// A client session's reply queue. Kept registered after delivery when `keep_alive`.
    Session {
        tx: mpsc::UnboundedSender<Value>,
        keep_alive: bool,
    },
    /// A coordinator-internal round trip; always removed on first delivery.
    OneShot(oneshot::Sender<Value>),
}

/// commandId -> reply destination for requests forwarded to the node.
#[derive(Debug, Default)]
pub struct PendingRequestRegistry {
    pending: Mutex<HashMap<String, DeliveryTarget>>,
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_session(
        &self,
        command_id: &str,
        tx: mpsc::UnboundedSender<Value>,
        keep_alive: bool,
    ) {
        let previous = self.pending.lock().await.insert(
            command_id.to_string(),
            DeliveryTarget::Session { tx, keep_alive },
        );
        if previous.is_some() {
            warn!(command_id, "Replacing existing registration");
        }
    }

    pub async fn register_oneshot(&self, command_id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(command_id.to_string(), DeliveryTarget::OneShot(tx));
        rx
    }

    /// Hand `reply` to whoever registered `command_id`.
    pub async fn deliver(&self, command_id: &str, reply: Value) -> Result<()> {
        let target = {
            let mut pending = self.pending.lock().await;
            match pending.remove(command_id) {
                None => return Err(DebuggerError::UnknownCommandId(command_id.to_string())),
                Some(DeliveryTarget::Session {
                    tx,
                    keep_alive: true,
                }) => {
                    pending.insert(
                        command_id.to_string(),
                        DeliveryTarget::Session {
                            tx: tx.clone(),
                            keep_alive: true,
                        },
                    );
                    DeliveryTarget::Session {
                        tx,
                        keep_alive: true,
                    }
                }
                Some(target) => target,
            }
        };

        let (delivered, kept) = match target {
            DeliveryTarget::Session { tx, keep_alive } => (tx.send(reply).is_ok(), keep_alive),
            DeliveryTarget::OneShot(tx) => (tx.send(reply).is_ok(), false),
        };
        if !delivered {
            debug!(command_id, "Receiver went away; dropping registration");
            if kept {
                self.pending.lock().await.remove(command_id);
            }
            return Err(DebuggerError::ChannelClosed(command_id.to_string()));
        }
        Ok(())
    }

    pub async fn remove(&self, command_id: &str) -> bool {
        self.pending.lock().await.remove(command_id).is_some()
    }

    pub async fn contains(&self, command_id: &str) -> bool {
        self.pending.lock().await.contains_key(command_id)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
