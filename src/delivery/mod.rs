//! Result delivery
//!
//! Step results go to the live subscriber channel of their session when one
//! is registered, otherwise to the event bus. Exactly one path is taken per
//! result. A subscriber that is gone, or that leaves its buffer full for
//! longer than [`sse::SEND_TIMEOUT`], is deregistered and the result goes to
//! the bus.

pub mod bus;
pub mod registry;
pub mod sse;

pub use bus::{BroadcastEventBus, BusMessage, EventBus};
pub use registry::{DashMapSubscriberRegistry, SubscriberRegistry};
pub use sse::{open_channel, SseChannel, SseFrame, Subscription, SEND_TIMEOUT};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::{StepEvent, StepListener};

pub const STEP_EVENT: &str = "step";

/// Which path a result took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Local,
    Bus,
    Dropped,
}

pub struct DeliveryDispatcher {
    registry: Arc<dyn SubscriberRegistry>,
    bus: Arc<dyn EventBus>,
    keep_alive: Duration,
    timeout: Duration,
}

impl DeliveryDispatcher {
    pub fn new(registry: Arc<dyn SubscriberRegistry>, bus: Arc<dyn EventBus>, config: &EngineConfig) -> Self {
        Self {
            registry,
            bus,
            keep_alive: config.keep_alive_interval,
            timeout: config.sse_timeout,
        }
    }

    /// Open a subscriber channel for `session_id` with the configured timings
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        open_channel(
            self.registry.clone(),
            Some(self.bus.clone()),
            session_id,
            self.keep_alive,
            self.timeout,
        )
    }

    /// Send the completion frame to `session_id`'s channel, if any
    pub async fn complete(&self, session_id: &str) -> bool {
        match self.registry.get(session_id) {
            Some(channel) => {
                channel.complete().await;
                true
            }
            None => false,
        }
    }

    pub async fn deliver(&self, event: StepEvent) -> DeliveryPath {
        if let Some(channel) = event.session_id.as_deref().and_then(|s| self.registry.get(s)) {
            match SseFrame::event(STEP_EVENT, &event) {
                Ok(frame) => {
                    if channel.send(frame).await {
                        debug!(session_id = %channel.session_id(), request = %event.result.request_name, "delivered to subscriber");
                        return DeliveryPath::Local;
                    }
                    debug!(session_id = %channel.session_id(), "subscriber gone or stalled, falling back to bus");
                    if self.registry.get(channel.session_id()).is_some_and(|c| c.id() == channel.id()) {
                        self.registry.remove(channel.session_id());
                    }
                    channel.close();
                }
                Err(e) => {
                    warn!(error = %e, "failed to encode step event");
                    return DeliveryPath::Dropped;
                }
            }
        }

        let request = event.result.request_name.clone();
        match self.bus.publish(BusMessage::StepCompleted(Box::new(event))).await {
            Ok(()) => {
                debug!(request = %request, "published to event bus");
                DeliveryPath::Bus
            }
            Err(e) => {
                warn!(request = %request, error = %e, "event bus publish failed");
                DeliveryPath::Dropped
            }
        }
    }
}

#[async_trait]
impl StepListener for DeliveryDispatcher {
    async fn on_step_complete(&self, event: StepEvent) {
        self.deliver(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolvingContext;
    use crate::models::request::Request;
    use crate::models::result::ExecutionResult;

    fn event(session: Option<&str>) -> StepEvent {
        let req = Request::new("ReqX", "GET", "http://x");
        StepEvent {
            run_id: "t".into(),
            session_id: session.map(String::from),
            position: 0,
            result: ExecutionResult::for_request(&req, ResolvingContext::new()).settle(),
        }
    }

    fn dispatcher() -> (DeliveryDispatcher, Arc<DashMapSubscriberRegistry>, Arc<BroadcastEventBus>) {
        let registry = Arc::new(DashMapSubscriberRegistry::new());
        let bus = Arc::new(BroadcastEventBus::default());
        let dispatcher = DeliveryDispatcher::new(registry.clone(), bus.clone(), &EngineConfig::default());
        (dispatcher, registry, bus)
    }

    #[tokio::test]
    async fn test_local_channel_preferred() {
        let (dispatcher, _, bus) = dispatcher();
        let mut bus_rx = bus.subscribe();
        let mut sub = dispatcher.subscribe("s1");

        assert_eq!(dispatcher.deliver(event(Some("s1"))).await, DeliveryPath::Local);
        match sub.next().await {
            Some(SseFrame::Event { event, data }) => {
                assert_eq!(event, STEP_EVENT);
                assert!(data.contains("ReqX"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(bus_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bus_fallback_without_subscriber() {
        let (dispatcher, _, bus) = dispatcher();
        let mut bus_rx = bus.subscribe();

        assert_eq!(dispatcher.deliver(event(Some("nobody"))).await, DeliveryPath::Bus);
        assert_eq!(dispatcher.deliver(event(None)).await, DeliveryPath::Bus);
        for _ in 0..2 {
            assert!(matches!(bus_rx.recv().await.unwrap(), BusMessage::StepCompleted(_)));
        }
    }

    #[tokio::test]
    async fn test_dead_channel_falls_back_to_bus() {
        let (dispatcher, registry, bus) = dispatcher();
        let mut bus_rx = bus.subscribe();
        let sub = dispatcher.subscribe("s1");
        drop(sub);

        assert_eq!(dispatcher.deliver(event(Some("s1"))).await, DeliveryPath::Bus);
        assert!(registry.get("s1").is_none());
        assert!(matches!(bus_rx.recv().await.unwrap(), BusMessage::StepCompleted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_falls_back_to_bus() {
        let registry = Arc::new(DashMapSubscriberRegistry::new());
        let bus = Arc::new(BroadcastEventBus::new(sse::CHANNEL_CAPACITY + 8));
        let config = EngineConfig {
            keep_alive_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let dispatcher = DeliveryDispatcher::new(registry.clone(), bus.clone(), &config);
        let mut bus_rx = bus.subscribe();
        let _sub = dispatcher.subscribe("s1");

        for _ in 0..sse::CHANNEL_CAPACITY {
            assert_eq!(dispatcher.deliver(event(Some("s1"))).await, DeliveryPath::Local);
        }
        let started = tokio::time::Instant::now();
        assert_eq!(dispatcher.deliver(event(Some("s1"))).await, DeliveryPath::Bus);
        assert!(started.elapsed() >= SEND_TIMEOUT);
        assert!(registry.get("s1").is_none());
        assert!(matches!(bus_rx.try_recv().unwrap(), BusMessage::StepCompleted(_)));

        assert_eq!(dispatcher.deliver(event(Some("s1"))).await, DeliveryPath::Bus);
    }

    #[tokio::test]
    async fn test_complete_closes_subscription() {
        let (dispatcher, registry, _) = dispatcher();
        let mut sub = dispatcher.subscribe("s1");
        assert!(dispatcher.complete("s1").await);
        assert_eq!(sub.next().await, Some(SseFrame::Complete));
        assert_eq!(sub.next().await, None);
        assert!(registry.is_empty());
        assert!(!dispatcher.complete("s1").await);
    }
}
