//! Connection plumbing and inbound message dispatch.
//!
//! The registry never sees a live socket: it holds only the opaque
//! `ChannelToken` this module hands out. Dropping a connection's table
//! entry is what drives the agent's `Offline` transition.

mod messages;

pub use messages::{dispatch, InboundMessage};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::clock;

pub type ChannelToken = String;

/// Outbound message queued for a single connection's writer task.
pub type Outbound = serde_json::Value;

/// Maps opaque channel tokens to the sender half of each connection's
/// outbound queue. Owned exclusively by the transport layer.
#[derive(Clone, Default)]
pub struct ConnectionTable {
    senders: Arc<Mutex<HashMap<ChannelToken, mpsc::UnboundedSender<Outbound>>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, sender: mpsc::UnboundedSender<Outbound>) -> ChannelToken {
        let token = clock::new_channel_token();
        self.senders.lock().await.insert(token.clone(), sender);
        token
    }

    pub async fn remove(&self, token: &str) {
        self.senders.lock().await.remove(token);
    }

    pub async fn send(&self, token: &str, message: Outbound) {
        if let Some(sender) = self.senders.lock().await.get(token) {
            let _ = sender.send(message);
        }
    }

    pub async fn broadcast(&self, message: Outbound) {
        let senders = self.senders.lock().await;
        for sender in senders.values() {
            let _ = sender.send(message.clone());
        }
    }

    pub async fn broadcast_except(&self, exclude: &str, message: Outbound) {
        let senders = self.senders.lock().await;
        for (token, sender) in senders.iter() {
            if token != exclude {
                let _ = sender.send(message.clone());
            }
        }
    }
}
