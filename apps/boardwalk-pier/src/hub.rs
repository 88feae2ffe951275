use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_CHANNEL_DEPTH: usize = 64;

/// Connected push clients, each with its own bounded outbound queue.
#[derive(Clone, Default)]
pub struct Hub {
    connections: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: Uuid) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_DEPTH);
        self.connections.write().insert(connection_id, tx);
        rx
    }

    pub fn unregister(&self, connection_id: Uuid) -> usize {
        let mut connections = self.connections.write();
        connections.remove(&connection_id);
        connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Queue `text` for every connection, the sender included. Returns how
    /// many queues accepted it.
    ///
    /// A connection whose queue is full or whose writer is gone is evicted:
    /// dropping its sender ends the writer, which closes the socket, so the
    /// client reconnects and resynchronizes instead of silently missing the
    /// frame.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut evicted = Vec::new();
        let mut delivered = 0;
        {
            let connections = self.connections.read();
            for (connection_id, tx) in connections.iter() {
                match tx.try_send(text.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(connection_id = %connection_id, "outbound queue full; evicting connection");
                        evicted.push(*connection_id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(connection_id = %connection_id, "writer gone; evicting connection");
                        evicted.push(*connection_id);
                    }
                }
            }
        }
        if !evicted.is_empty() {
            let mut connections = self.connections.write();
            for connection_id in &evicted {
                connections.remove(connection_id);
            }
        }
        delivered
    }
}
