//! Subscriber channel registry

use dashmap::DashMap;

use super::sse::SseChannel;

/// Live subscriber channels keyed by session id
pub trait SubscriberRegistry: Send + Sync {
    fn get(&self, session_id: &str) -> Option<SseChannel>;
    /// Register `channel`, returning the one it replaced
    fn put(&self, session_id: &str, channel: SseChannel) -> Option<SseChannel>;
    fn remove(&self, session_id: &str) -> Option<SseChannel>;
}

#[derive(Debug, Default)]
pub struct DashMapSubscriberRegistry {
    channels: DashMap<String, SseChannel>,
}

impl DashMapSubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl SubscriberRegistry for DashMapSubscriberRegistry {
    fn get(&self, session_id: &str) -> Option<SseChannel> {
        self.channels.get(session_id).map(|c| c.value().clone())
    }

    fn put(&self, session_id: &str, channel: SseChannel) -> Option<SseChannel> {
        self.channels.insert(session_id.to_string(), channel)
    }

    fn remove(&self, session_id: &str) -> Option<SseChannel> {
        self.channels.remove(session_id).map(|(_, c)| c)
    }
}
