//! In-process publish/subscribe bus with per-subscription delivery mode.
//!
//! Subscriptions are keyed by the event's concrete type. Sync subscribers run
//! on the publisher's thread in registration order; Async subscribers are
//! handed to a fixed pool of worker threads and `publish` returns without
//! waiting for them. A failing handler is logged and isolated — it never
//! stops the remaining subscribers and never reaches the publisher.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::{Mutex, RwLock};

/// How a subscription wants its events delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// On the publisher's thread, before `publish` returns.
    Sync,
    /// On the bus worker pool; `publish` does not wait.
    Async,
}

/// Handle for targeted unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    event: TypeId,
    id: u64,
}

type HandlerFn = dyn Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync;

#[derive(Clone)]
struct Subscription {
    id: u64,
    mode: DeliveryMode,
    event_name: &'static str,
    handler: Arc<HandlerFn>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of named worker threads draining an unbounded queue. Saturation
/// queues jobs rather than dropping them.
struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("event-worker-{n}"))
                .spawn(move || loop {
                    // Take the next job with the receiver lock released before
                    // running it, so long handlers don't serialize the pool.
                    let job = receiver.lock().recv();
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    fn submit(&self, job: Job) {
        if let Some(sender) = &self.sender {
            // A send error means the pool is already shutting down; the event
            // is dropped with the rest of the process.
            let _ = sender.send(job);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// The event bus. Cheap to share behind an `Arc`.
pub struct EventBus {
    subscriptions: RwLock<HashMap<TypeId, Vec<Subscription>>>,
    next_id: AtomicU64,
    pool: WorkerPool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subs = self.subscriptions.read();
        let total: usize = subs.values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("event_kinds", &subs.len())
            .field("subscriptions", &total)
            .field("workers", &self.pool.workers.len())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with `workers` async delivery threads (clamped to at
    /// least one).
    pub fn new(workers: usize) -> std::io::Result<Self> {
        Ok(Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pool: WorkerPool::new(workers)?,
        })
    }

    /// Register a handler for events of type `E`.
    pub fn subscribe<E, F>(&self, mode: DeliveryMode, handler: F) -> SubscriptionHandle
    where
        E: Any + Send + Sync,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: Arc<HandlerFn> = Arc::new(move |event| {
            match event.downcast_ref::<E>() {
                Some(event) => handler(event),
                // Unreachable through the typed API; subscriptions are looked
                // up by the event's TypeId.
                None => Err(anyhow::anyhow!("event payload type mismatch")),
            }
        });

        self.subscriptions
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscription {
                id,
                mode,
                event_name: type_name::<E>(),
                handler: wrapped,
            });

        SubscriptionHandle {
            event: TypeId::of::<E>(),
            id,
        }
    }

    /// Deliver `event` to every active subscription for its type. Operates on
    /// a point-in-time snapshot: concurrent (un)subscription does not affect
    /// an in-flight publish.
    pub fn publish<E: Any + Send + Sync>(&self, event: E) {
        let snapshot: Vec<Subscription> = {
            let subs = self.subscriptions.read();
            match subs.get(&TypeId::of::<E>()) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        let event = Arc::new(event);
        for sub in snapshot {
            match sub.mode {
                DeliveryMode::Sync => {
                    let payload: &(dyn Any + Send + Sync) = &*event;
                    if let Err(error) = (sub.handler)(payload) {
                        tracing::warn!(
                            event = sub.event_name,
                            subscription = sub.id,
                            error = %error,
                            "sync event handler failed"
                        );
                    }
                }
                DeliveryMode::Async => {
                    let handler = sub.handler.clone();
                    let event = event.clone();
                    let event_name = sub.event_name;
                    let id = sub.id;
                    self.pool.submit(Box::new(move || {
                        let payload: &(dyn Any + Send + Sync) = &*event;
                        if let Err(error) = handler(payload) {
                            tracing::warn!(
                                event = event_name,
                                subscription = id,
                                error = %error,
                                "async event handler failed"
                            );
                        }
                    }));
                }
            }
        }
    }

    /// Remove a single subscription. Returns whether it was still active.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subs = self.subscriptions.write();
        let Some(list) = subs.get_mut(&handle.event) else {
            return false;
        };
        let before = list.len();
        list.retain(|sub| sub.id != handle.id);
        let removed = list.len() < before;
        if list.is_empty() {
            subs.remove(&handle.event);
        }
        removed
    }

    /// Remove every subscription for the event type. Returns how many were
    /// dropped.
    pub fn unsubscribe_all_for<E: Any + Send + Sync>(&self) -> usize {
        self.subscriptions
            .write()
            .remove(&TypeId::of::<E>())
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct OrderShipped {
        order_id: u64,
    }

    struct Unrelated;

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new(2).unwrap();
        bus.publish(OrderShipped { order_id: 1 });
    }

    #[test]
    fn sync_delivery_runs_in_registration_order() {
        let bus = EventBus::new(1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, move |_| {
                seen.lock().push(tag);
                Ok(())
            });
        }

        bus.publish(OrderShipped { order_id: 7 });
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_sync_handler_does_not_stop_the_rest() {
        let bus = EventBus::new(1).unwrap();
        let second_ran = Arc::new(AtomicUsize::new(0));

        bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, |_| {
            Err(anyhow::anyhow!("downstream unavailable"))
        });
        {
            let second_ran = second_ran.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, move |event| {
                assert_eq!(event.order_id, 9);
                second_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.publish(OrderShipped { order_id: 9 });
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn async_delivery_completes_after_publish_returns() {
        let bus = EventBus::new(2).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        {
            let delivered = delivered.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Async, move |_| {
                thread::sleep(Duration::from_millis(20));
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.publish(OrderShipped { order_id: 3 });
        // publish must not have waited for the handler.
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert!(wait_until(Duration::from_secs(2), || {
            delivered.load(Ordering::SeqCst) == 1
        }));
        // Exactly once: give a stray double-delivery time to show up.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_only_reach_matching_subscriptions() {
        let bus = EventBus::new(1).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.publish(Unrelated);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.publish(OrderShipped { order_id: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_a_single_subscription() {
        let bus = EventBus::new(1).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let handle = {
            let hits = hits.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let kept = Arc::new(AtomicUsize::new(0));
        {
            let kept = kept.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, move |_| {
                kept.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));

        bus.publish(OrderShipped { order_id: 4 });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_all_clears_the_event_kind() {
        let bus = EventBus::new(1).unwrap();
        bus.subscribe::<OrderShipped, _>(DeliveryMode::Sync, |_| Ok(()));
        bus.subscribe::<OrderShipped, _>(DeliveryMode::Async, |_| Ok(()));

        assert_eq!(bus.unsubscribe_all_for::<OrderShipped>(), 2);
        assert_eq!(bus.unsubscribe_all_for::<OrderShipped>(), 0);
    }

    #[test]
    fn slow_workers_queue_instead_of_dropping() {
        let bus = EventBus::new(1).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        {
            let delivered = delivered.clone();
            bus.subscribe::<OrderShipped, _>(DeliveryMode::Async, move |_| {
                thread::sleep(Duration::from_millis(10));
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        for order_id in 0..10 {
            bus.publish(OrderShipped { order_id });
        }
        assert!(wait_until(Duration::from_secs(5), || {
            delivered.load(Ordering::SeqCst) == 10
        }));
    }
}
