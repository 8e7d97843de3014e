//! Event bus for cross-instance delivery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::StepEvent;
use crate::errors::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// A step result with no local subscriber
    StepCompleted(Box<StepEvent>),
    /// A subscriber channel timed out
    ChannelExpired { session_id: String },
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, message: BusMessage) -> Result<()>;
}

/// In-process bus on a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<BusMessage>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, message: BusMessage) -> Result<()> {
        // A bus with no listeners drops the message
        if self.sender.send(message).is_err() {
            debug!("event bus has no subscribers, message dropped");
        }
        Ok(())
    }
}
