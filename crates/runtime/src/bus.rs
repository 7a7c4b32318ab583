//! Agent-event bus.
//!
//! Fan-out with no back-pressure from subscribers to publishers: every
//! subscriber gets its own unbounded channel, so a blocked subscriber
//! only slows its own delivery. Dropped receivers are pruned on the next
//! publish.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use sr_domain::event::RuntimeEvent;
use sr_domain::usage::{UsageRecord, UsageTotals};

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Arc<RuntimeEvent>>>>,
    totals: Mutex<UsageTotals>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<RuntimeEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publish an event to all live subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        let event = Arc::new(event);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Fold one completion's usage into the run aggregate and publish
    /// the combined usage event.
    pub fn publish_usage(&self, usage: &UsageRecord) {
        let totals = {
            let mut totals = self.totals.lock();
            totals.record(usage);
            totals.clone()
        };
        self.publish(RuntimeEvent::Usage { usage: usage.clone(), totals });
    }

    /// The aggregate usage published so far.
    pub fn usage_totals(&self) -> UsageTotals {
        self.totals.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(RuntimeEvent::Info { message: "hello".into() });

        for rx in [&mut rx1, &mut rx2] {
            let ev = rx.recv().await.unwrap();
            assert!(matches!(&*ev, RuntimeEvent::Info { message } if message == "hello"));
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(RuntimeEvent::Info { message: "x".into() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn usage_events_carry_running_totals() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish_usage(&UsageRecord { prompt_tokens: 10, completion_tokens: 2, cost: None });
        bus.publish_usage(&UsageRecord { prompt_tokens: 5, completion_tokens: 1, cost: None });

        let _first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let RuntimeEvent::Usage { usage, totals } = &*second else {
            panic!("expected usage event");
        };
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(totals.prompt_tokens, 15);
        assert_eq!(totals.completions, 2);
        assert_eq!(bus.usage_totals().total_tokens(), 18);
    }

    #[tokio::test]
    async fn publisher_is_not_blocked_by_slow_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        // Publish many events without anyone reading.
        for i in 0..1000 {
            bus.publish(RuntimeEvent::Info { message: format!("m{i}") });
        }
        // All delivered in order.
        let first = rx.recv().await.unwrap();
        assert!(matches!(&*first, RuntimeEvent::Info { message } if message == "m0"));
    }
}
