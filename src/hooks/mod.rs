// Hook Event Bus and Hook Manager.
//
// `EventBus` is the in-process pub/sub backbone every other subsystem
// publishes onto (heartbeat transitions, router decisions, discovery
// results), with a bounded per-subscriber queue and drop-oldest
// backpressure.
//
// `HookManager` loads declarative hook definitions (YAML, one directory
// entry per hook) the same way the Steering Engine loads steering rules —
// both use `crate::expr` for the `condition` field so the grammar is
// identical across the two subsystems.

mod bridge;
mod manager;

pub use bridge::bridge_heartbeat_event;
pub use manager::{ActionRunner, Hook, HookAction, HookManager, LoggingActionRunner};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

use crate::model::{EventContext, EventKind};

pub type Handler = Arc<dyn Fn(EventContext) -> BoxFuture<'static, ()> + Send + Sync>;

struct QueueItem {
    ctx: EventContext,
    done: Option<oneshot::Sender<()>>,
}

struct Subscriber {
    queue: Mutex<std::collections::VecDeque<QueueItem>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

/// Bounded, per-event-type pub/sub bus. Each subscriber gets its own FIFO
/// queue and a dedicated worker task, so slow handlers on one subscriber
/// never block delivery to another, and delivery order is preserved per
/// subscriber within a single event kind.
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Arc<Subscriber>>>>,
    capacity: usize,
    shutdown: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            shutdown: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers `handler` for `kind`, spawning its dedicated worker task.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(EventContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let sub = Arc::new(Subscriber {
            queue: Mutex::new(std::collections::VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: self.capacity,
        });
        self.subscribers
            .lock()
            .entry(kind)
            .or_insert_with(Vec::new)
            .push(sub.clone());

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                sub.notify.notified().await;
                loop {
                    if shutdown.load(Ordering::Acquire) != 0 {
                        return;
                    }
                    let item = sub.queue.lock().pop_front();
                    match item {
                        Some(QueueItem { ctx, done }) => {
                            let fut = handler(ctx);
                            if let Err(e) = tokio::spawn(fut).await {
                                log::error!("hook handler panicked: {e}");
                            }
                            if let Some(done) = done {
                                let _ = done.send(());
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn enqueue(&self, kind: EventKind, ctx: &EventContext, done_slots: &mut Vec<oneshot::Receiver<()>>, wait: bool) {
        let subs = self.subscribers.lock();
        let Some(list) = subs.get(&kind) else { return };
        for sub in list {
            let mut q = sub.queue.lock();
            if q.len() >= sub.capacity {
                q.pop_front();
                sub.dropped.fetch_add(1, Ordering::Relaxed);
            }
            let done = if wait {
                let (tx, rx) = oneshot::channel();
                done_slots.push(rx);
                Some(tx)
            } else {
                None
            };
            q.push_back(QueueItem { ctx: ctx.clone(), done });
            drop(q);
            sub.notify.notify_one();
        }
    }

    /// Fire-and-forget enqueue; never blocks the publisher.
    pub fn publish_async(&self, ctx: EventContext) {
        let kind = ctx.event;
        let mut unused = Vec::new();
        self.enqueue(kind, &ctx, &mut unused, false);
    }

    /// Enqueues `ctx` and waits (up to `timeout`) for every current
    /// subscriber to finish processing it — the synchronous `Publish`
    /// variant, for callers that need delivery ordering guarantees.
    pub async fn publish(&self, ctx: EventContext, timeout: Duration) {
        let kind = ctx.event;
        let mut waiters = Vec::new();
        self.enqueue(kind, &ctx, &mut waiters, true);
        let all = futures::future::join_all(waiters.into_iter().map(|rx| async move {
            let _ = rx.await;
        }));
        let _ = tokio::time::timeout(timeout, all).await;
    }

    /// Total events dropped for overflow, across all subscribers of `kind`.
    pub fn dropped_count(&self, kind: EventKind) -> u64 {
        self.subscribers
            .lock()
            .get(&kind)
            .map(|subs| subs.iter().map(|s| s.dropped.load(Ordering::Relaxed)).sum())
            .unwrap_or(0)
    }

    /// Marks the bus as shutting down; worker tasks exit on their next
    /// queue-drain iteration rather than processing further events.
    pub fn shutdown(&self) {
        self.shutdown.store(1, Ordering::Release);
        for subs in self.subscribers.lock().values() {
            for s in subs {
                s.notify.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn publish_async_delivers_in_order() {
        let bus = EventBus::new(8);
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();
        bus.subscribe(EventKind::ModelDiscovered, move |ctx| {
            let order = order2.clone();
            Box::pin(async move {
                order.lock().push(ctx.data.get("seq").cloned().unwrap_or_default());
            })
        });
        for i in 0..5 {
            bus.publish_async(
                EventContext::new(EventKind::ModelDiscovered).with_data("seq", i.to_string()),
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*order.lock(), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        // handler sleeps so the queue actually backs up before draining
        bus.subscribe(EventKind::QuotaWarning, move |_ctx| {
            let counter = counter2.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::Relaxed);
            })
        });
        for _ in 0..10 {
            bus.publish_async(EventContext::new(EventKind::QuotaWarning));
        }
        assert!(bus.dropped_count(EventKind::QuotaWarning) > 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn publish_waits_for_subscriber_completion() {
        let bus = EventBus::new(8);
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        bus.subscribe(EventKind::RequestReceived, move |_ctx| {
            let flag = flag2.clone();
            Box::pin(async move {
                flag.store(1, Ordering::SeqCst);
            })
        });
        bus.publish(
            EventContext::new(EventKind::RequestReceived),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }
}
