//! Server-sent event channels
//!
//! A channel is an mpsc sender registered under a session id. While it is
//! open a background task pushes `retry: 0` keep-alive frames; the task
//! stops on completion, explicit close, a dropped receiver or the channel
//! timeout, and deregisters the channel on the way out.
//!
//! Keep-alives never wait for buffer space, and other frames wait at most
//! [`SEND_TIMEOUT`], so a subscriber that stops reading cannot hold up the
//! timeout or the run producing results.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::bus::{BusMessage, EventBus};
use super::registry::SubscriberRegistry;

pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Longest a full subscriber buffer may hold up a sender
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Event { event: String, data: String },
    KeepAlive,
    Complete,
    Expired,
}

impl SseFrame {
    pub fn event<T: Serialize>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(SseFrame::Event {
            event: event.to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Text/event-stream encoding
    pub fn to_wire(&self) -> String {
        match self {
            SseFrame::Event { event, data } => {
                let mut out = format!("event: {}\n", event);
                for line in data.lines() {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                out
            }
            SseFrame::KeepAlive => "retry: 0\n\n".to_string(),
            SseFrame::Complete => "event: complete\ndata: {}\n\n".to_string(),
            SseFrame::Expired => "event: expired\ndata: {}\n\n".to_string(),
        }
    }
}

/// Sending half of a subscriber channel, as stored in the registry
#[derive(Debug, Clone)]
pub struct SseChannel {
    id: Uuid,
    session_id: String,
    sender: mpsc::Sender<SseFrame>,
    stop: Arc<Notify>,
}

impl SseChannel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Returns false when the subscriber is gone or has not drained its
    /// buffer within [`SEND_TIMEOUT`]
    pub async fn send(&self, frame: SseFrame) -> bool {
        self.sender.send_timeout(frame, SEND_TIMEOUT).await.is_ok()
    }

    /// Queue a keep-alive without waiting. A full buffer drops the frame;
    /// returns false only when the subscriber is gone.
    fn keep_alive(&self) -> bool {
        match self.sender.try_send(SseFrame::KeepAlive) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Send the completion frame and stop the keep-alive task
    pub async fn complete(&self) {
        if !self.send(SseFrame::Complete).await {
            debug!(session_id = %self.session_id, "completion frame not delivered");
        }
        self.stop.notify_one();
    }

    /// Stop the keep-alive task without a final frame
    pub fn close(&self) {
        self.stop.notify_one();
    }
}

/// Receiving half handed to the subscriber.
///
/// Holds no sender, so `next` yields `None` once the channel is
/// deregistered and its keep-alive task has ended.
#[derive(Debug)]
pub struct Subscription {
    pub session_id: String,
    channel_id: Uuid,
    frames: mpsc::Receiver<SseFrame>,
    stop: Arc<Notify>,
}

impl Subscription {
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub async fn next(&mut self) -> Option<SseFrame> {
        self.frames.recv().await
    }

    /// Subscriber-side close
    pub fn close(&self) {
        self.stop.notify_one();
    }
}

/// Register a channel for `session_id` and start its keep-alive task.
///
/// A channel already registered under the same session is replaced; its
/// task notices on exit and leaves the new registration alone.
pub fn open_channel(
    registry: Arc<dyn SubscriberRegistry>,
    bus: Option<Arc<dyn EventBus>>,
    session_id: &str,
    keep_alive: Duration,
    timeout: Duration,
) -> Subscription {
    let (sender, frames) = mpsc::channel(CHANNEL_CAPACITY);
    let channel = SseChannel {
        id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        sender,
        stop: Arc::new(Notify::new()),
    };
    if let Some(previous) = registry.put(session_id, channel.clone()) {
        previous.close();
    }
    debug!(session_id, "subscriber channel opened");

    let subscription = Subscription {
        session_id: session_id.to_string(),
        channel_id: channel.id,
        frames,
        stop: channel.stop.clone(),
    };
    tokio::spawn(keep_alive_task(registry, bus, channel, keep_alive, timeout));
    subscription
}

async fn keep_alive_task(
    registry: Arc<dyn SubscriberRegistry>,
    bus: Option<Arc<dyn EventBus>>,
    channel: SseChannel,
    every: Duration,
    timeout: Duration,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    let deadline = sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !channel.keep_alive() {
                    debug!(session_id = %channel.session_id, "subscriber went away");
                    break;
                }
            }
            _ = channel.stop.notified() => {
                debug!(session_id = %channel.session_id, "subscriber channel closed");
                break;
            }
            _ = &mut deadline => {
                warn!(session_id = %channel.session_id, ?timeout, "subscriber channel expired");
                let _ = channel.sender.try_send(SseFrame::Expired);
                if let Some(bus) = &bus {
                    let message = BusMessage::ChannelExpired {
                        session_id: channel.session_id.clone(),
                    };
                    if let Err(e) = bus.publish(message).await {
                        warn!(session_id = %channel.session_id, error = %e, "expiry notification failed");
                    }
                }
                break;
            }
        }
    }

    if registry.get(&channel.session_id).is_some_and(|c| c.id == channel.id) {
        registry.remove(&channel.session_id);
    }
}
