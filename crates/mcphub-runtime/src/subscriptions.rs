//! Subscription layer: fan-out to external clients, client accounting, and
//! auto-shutdown.
//!
//! Each subscriber registers a filter over subscription-event subtypes and a
//! sink (`push` + `close`). Events are delivered in emission order through a
//! bounded per-subscriber queue; a subscriber whose queue overflows is
//! dropped and its sink closed, so one slow client never blocks the
//! producer or its peers. When the last subscriber leaves and auto-shutdown
//! is enabled, a grace timer arms; if it fires, the layer emits
//! `HUB_STATE = stopping` and signals the process to terminate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mcphub_core::{
    EventBus, EventSender, EventTopic, HubEvent, HubState, SubscriptionEventKind,
};
use uuid::Uuid;

/// Per-subscriber queue bound. Exceeding it drops the subscriber.
const SUBSCRIBER_QUEUE_BOUND: usize = 256;

/// Default grace period before an empty hub shuts itself down.
pub const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(600);

/// Why the hub asked to terminate; maps to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Client-initiated or clean (auto-shutdown, explicit stop): exit 0.
    Clean,
    /// An unhandled error surfaced to the top: exit 1.
    Fatal,
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Fatal => 1,
        }
    }
}

/// Where delivered events go. External transports implement this.
pub trait SubscriberSink: Send + Sync {
    fn push(&self, event: &HubEvent);
    fn close(&self);
}

/// Filter over `SUBSCRIPTION_EVENT` subtypes. `HUB_STATE` and `LOG` events
/// pass every filter.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    kinds: Option<HashSet<SubscriptionEventKind>>,
}

impl SubscriptionFilter {
    /// Everything.
    pub fn all() -> Self {
        Self { kinds: None }
    }

    /// Only the given subtypes (plus hub-state and log events).
    pub fn only(kinds: impl IntoIterator<Item = SubscriptionEventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    pub fn accepts(&self, event: &HubEvent) -> bool {
        match event.topic() {
            EventTopic::HubState | EventTopic::Log => true,
            EventTopic::SubscriptionEvent => match (&self.kinds, event.subscription_kind()) {
                (None, _) => true,
                (Some(kinds), Some(kind)) => kinds.contains(&kind),
                (Some(_), None) => false,
            },
        }
    }
}

struct SubscriberEntry {
    filter: SubscriptionFilter,
    queue: mpsc::Sender<HubEvent>,
    sink: Arc<dyn SubscriberSink>,
    forward_task: JoinHandle<()>,
}

/// Auto-shutdown configuration.
#[derive(Debug, Clone)]
pub struct AutoShutdown {
    /// `None` disables the timer entirely.
    pub delay: Option<Duration>,
}

impl Default for AutoShutdown {
    fn default() -> Self {
        Self {
            delay: Some(DEFAULT_SHUTDOWN_DELAY),
        }
    }
}

pub struct SubscriptionLayer {
    subscribers: DashMap<Uuid, SubscriberEntry>,
    events: EventSender,
    auto_shutdown: AutoShutdown,
    shutdown_tx: watch::Sender<Option<ShutdownReason>>,
    shutdown_rx: watch::Receiver<Option<ShutdownReason>>,
    timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionLayer {
    pub fn new(events: EventSender, auto_shutdown: AutoShutdown) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        Arc::new(Self {
            subscribers: DashMap::new(),
            events,
            auto_shutdown,
            shutdown_tx,
            shutdown_rx,
            timer: parking_lot::Mutex::new(None),
            pump: parking_lot::Mutex::new(None),
        })
    }

    /// Attach to the bus; events emitted from now on reach subscribers.
    pub fn start(self: &Arc<Self>, bus: &EventBus) {
        let mut receiver = bus.subscribe();
        let layer = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Some(layer) = layer.upgrade() else {
                    break;
                };
                layer.dispatch(&event);
            }
        });
        *self.pump.lock() = Some(task);
    }

    /// Register a subscriber; cancels a pending auto-shutdown.
    pub fn subscribe(
        self: &Arc<Self>,
        filter: SubscriptionFilter,
        sink: Arc<dyn SubscriberSink>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let (queue_tx, mut queue_rx) = mpsc::channel::<HubEvent>(SUBSCRIBER_QUEUE_BOUND);

        let forward_sink = sink.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                forward_sink.push(&event);
            }
        });

        self.subscribers.insert(
            id,
            SubscriberEntry {
                filter,
                queue: queue_tx,
                sink,
                forward_task,
            },
        );
        self.cancel_shutdown_timer();

        info!(
            subscriber = %id,
            total = self.subscribers.len(),
            "[Subscriptions] Subscriber registered"
        );
        id
    }

    /// Remove a subscriber; arms the auto-shutdown timer when it was the
    /// last one.
    pub fn unsubscribe(self: &Arc<Self>, id: Uuid) {
        if let Some((_, entry)) = self.subscribers.remove(&id) {
            entry.forward_task.abort();
            entry.sink.close();
            info!(
                subscriber = %id,
                remaining = self.subscribers.len(),
                "[Subscriptions] Subscriber removed"
            );
        }
        self.arm_shutdown_if_empty();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Fires with a reason when the hub wants the process to exit.
    pub fn shutdown_signal(&self) -> watch::Receiver<Option<ShutdownReason>> {
        self.shutdown_rx.clone()
    }

    /// Request termination explicitly (used by the hub's own stop path).
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        let _ = self.shutdown_tx.send(Some(reason));
    }

    fn dispatch(self: &Arc<Self>, event: &HubEvent) {
        let mut overflowed: Vec<Uuid> = Vec::new();
        for entry in self.subscribers.iter() {
            if !entry.filter.accepts(event) {
                continue;
            }
            match entry.queue.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %entry.key(),
                        "[Subscriptions] Queue overflow, dropping subscriber"
                    );
                    overflowed.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    overflowed.push(*entry.key());
                }
            }
        }
        for id in overflowed {
            self.unsubscribe(id);
        }
    }

    fn cancel_shutdown_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            debug!("[Subscriptions] Auto-shutdown cancelled");
            timer.abort();
        }
    }

    fn arm_shutdown_if_empty(self: &Arc<Self>) {
        if !self.subscribers.is_empty() {
            return;
        }
        let Some(delay) = self.auto_shutdown.delay else {
            return;
        };

        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        info!(delay = ?delay, "[Subscriptions] No subscribers left, arming auto-shutdown");
        let layer = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(layer) = layer.upgrade() else {
                return;
            };
            if !layer.subscribers.is_empty() {
                return;
            }
            info!("[Subscriptions] Auto-shutdown timer fired");
            layer.events.emit(HubEvent::HubStateChanged {
                state: HubState::Stopping,
            });
            layer.request_shutdown(ShutdownReason::Clean);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcphub_core::{ConnectionState, LogLevel};
    use parking_lot::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<HubEvent>>,
        closed: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                closed: Mutex::new(false),
            })
        }

        fn received(&self) -> Vec<HubEvent> {
            self.events.lock().clone()
        }

        fn is_closed(&self) -> bool {
            *self.closed.lock()
        }
    }

    impl SubscriberSink for RecordingSink {
        fn push(&self, event: &HubEvent) {
            self.events.lock().push(event.clone());
        }

        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn layer_with_bus(auto_shutdown: AutoShutdown) -> (Arc<SubscriptionLayer>, EventBus) {
        let bus = EventBus::new();
        let layer = SubscriptionLayer::new(bus.sender(), auto_shutdown);
        layer.start(&bus);
        (layer, bus)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_filtered_delivery_in_order() {
        let (layer, bus) = layer_with_bus(AutoShutdown { delay: None });
        let sink = RecordingSink::new();
        layer.subscribe(
            SubscriptionFilter::only([SubscriptionEventKind::ToolListChanged]),
            sink.clone(),
        );

        let sender = bus.sender();
        sender.emit(HubEvent::ToolsChanged { server: "a".into() });
        sender.emit(HubEvent::PromptsChanged { server: "a".into() });
        sender.emit(HubEvent::ToolsChanged { server: "b".into() });
        settle().await;

        let received = sink.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].server(), Some("a"));
        assert_eq!(received[1].server(), Some("b"));
    }

    #[tokio::test]
    async fn test_hub_state_and_log_pass_every_filter() {
        let (layer, bus) = layer_with_bus(AutoShutdown { delay: None });
        let sink = RecordingSink::new();
        layer.subscribe(
            SubscriptionFilter::only([SubscriptionEventKind::ConfigChanged]),
            sink.clone(),
        );

        bus.sender().emit(HubEvent::HubStateChanged {
            state: HubState::Ready,
        });
        bus.sender().emit(HubEvent::Log {
            level: LogLevel::Info,
            message: "hello".into(),
        });
        settle().await;

        assert_eq!(sink.received().len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_sink_without_affecting_others() {
        let (layer, bus) = layer_with_bus(AutoShutdown { delay: None });
        let gone = RecordingSink::new();
        let stays = RecordingSink::new();
        let gone_id = layer.subscribe(SubscriptionFilter::all(), gone.clone());
        layer.subscribe(SubscriptionFilter::all(), stays.clone());

        layer.unsubscribe(gone_id);
        assert!(gone.is_closed());

        bus.sender().emit(HubEvent::ServerStateChanged {
            server: "a".into(),
            state: ConnectionState::Connected,
            message: None,
        });
        settle().await;

        assert!(gone.received().is_empty());
        assert_eq!(stays.received().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_shutdown_arms_and_fires() {
        tokio::time::pause();
        let (layer, _bus) = layer_with_bus(AutoShutdown {
            delay: Some(Duration::from_secs(5)),
        });
        let sink = RecordingSink::new();
        let id = layer.subscribe(SubscriptionFilter::all(), sink);
        let mut signal = layer.shutdown_signal();

        layer.unsubscribe(id);
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::time::resume();

        tokio::time::timeout(Duration::from_secs(2), signal.wait_for(|r| r.is_some()))
            .await
            .expect("shutdown signal not fired")
            .unwrap();
        assert_eq!(
            *layer.shutdown_signal().borrow(),
            Some(ShutdownReason::Clean)
        );
    }

    #[tokio::test]
    async fn test_new_subscriber_cancels_pending_shutdown() {
        tokio::time::pause();
        let (layer, _bus) = layer_with_bus(AutoShutdown {
            delay: Some(Duration::from_secs(5)),
        });
        let first = layer.subscribe(SubscriptionFilter::all(), RecordingSink::new());
        layer.unsubscribe(first);

        // A new client arrives before the timer fires.
        tokio::time::advance(Duration::from_secs(2)).await;
        layer.subscribe(SubscriptionFilter::all(), RecordingSink::new());

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::time::resume();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(layer.shutdown_signal().borrow().is_none());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownReason::Clean.exit_code(), 0);
        assert_eq!(ShutdownReason::Fatal.exit_code(), 1);
    }
}
