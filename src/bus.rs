//! In-process publish/subscribe.
//!
//! Every subscriber gets its own unit of work per event (a blocking-pool task), so a
//! slow or panicking subscriber neither delays the publisher nor the other
//! subscribers. The subscriber list is copy-on-write: `publish` snapshots an `Arc`
//! of the current list and never observes a half-applied `subscribe`.

use crate::model::{Run, RunKind};
use crate::view::ViewId;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    PageLoaded {
        view: ViewId,
        items: usize,
        exhausted: bool,
    },
    RunSelected {
        kind: RunKind,
        run_id: String,
        title: String,
    },
    StepsLoaded {
        run_id: String,
        count: usize,
    },
    StepSelected {
        run_id: String,
        step_id: String,
        name: String,
    },
    StepDetailLoaded {
        run_id: String,
        step_id: String,
    },
    CommandLogLoaded {
        run_id: String,
        step_id: String,
        lines: usize,
    },
    FetchFailed {
        view: ViewId,
        message: String,
    },
    /// A run seen as active on the previous refresh is now terminal.
    RunFinished(Run),
}

type Handler<E> = Arc<dyn Fn(E) + Send + Sync>;

pub struct EventBus<E> {
    subscribers: RwLock<Arc<Vec<Handler<E>>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Handler<E>> = guard.as_ref().clone();
        next.push(Arc::new(handler));
        *guard = Arc::new(next);
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Deliver `event` to every current subscriber without waiting for any of them.
    /// Subscribers registered later never see it.
    pub fn publish(&self, event: E) {
        let subscribers = self.snapshot();
        let runtime = tokio::runtime::Handle::try_current().ok();
        for handler in subscribers.iter() {
            let handler = handler.clone();
            let event = event.clone();
            match &runtime {
                Some(rt) => {
                    rt.spawn_blocking(move || handler(event));
                }
                None => {
                    std::thread::spawn(move || handler(event));
                }
            }
        }
    }

    fn snapshot(&self) -> Arc<Vec<Handler<E>>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Short one-line description, used by the audit subscriber.
pub fn describe(event: &BusEvent) -> String {
    match event {
        BusEvent::PageLoaded {
            view,
            items,
            exhausted,
        } => format!(
            "{}: {items} items{}",
            view.title(),
            if *exhausted { " (end of feed)" } else { "" }
        ),
        BusEvent::RunSelected { title, .. } => format!("selected {title}"),
        BusEvent::StepsLoaded { run_id, count } => format!("{count} steps for {run_id}"),
        BusEvent::StepSelected { name, .. } => format!("selected step {name}"),
        BusEvent::StepDetailLoaded { step_id, .. } => format!("detail for {step_id}"),
        BusEvent::CommandLogLoaded { lines, .. } => format!("log loaded ({lines} lines)"),
        BusEvent::FetchFailed { view, message } => format!("{} failed: {message}", view.title()),
        BusEvent::RunFinished(run) => format!("{} finished: {}", run.display_title(), run.state.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_subscriber_receives() {
        let bus = EventBus::<u32>::new();
        let (tx, rx) = mpsc::channel();
        for id in 0..3 {
            let tx = tx.clone();
            bus.subscribe(move |e| {
                let _ = tx.send((id, e));
            });
        }
        bus.publish(7);
        let mut got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_and_panicking_subscribers_do_not_block_others() {
        let bus = EventBus::<&'static str>::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(|_| std::thread::sleep(Duration::from_millis(500)));
        bus.subscribe(|_| panic!("subscriber bug"));
        bus.subscribe(move |e| {
            let _ = tx.send(e);
        });

        let started = Instant::now();
        bus.publish("hello");
        assert!(started.elapsed() < Duration::from_millis(200), "publish blocked");

        assert_eq!(rx.recv_timeout(Duration::from_millis(400)).unwrap(), "hello");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_replay_for_late_subscribers() {
        let bus = EventBus::<u8>::new();
        bus.publish(1);
        let (tx, rx) = mpsc::channel();
        bus.subscribe(move |e| {
            let _ = tx.send(e);
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        bus.publish(2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
    }

    #[test]
    fn subscribe_concurrently_with_publish() {
        let bus = Arc::new(EventBus::<u8>::new());
        let publisher = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    bus.publish(i);
                }
            })
        };
        let subscribers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        bus.subscribe(|_| {});
                    }
                })
            })
            .collect();
        publisher.join().unwrap();
        for s in subscribers {
            s.join().unwrap();
        }
        assert_eq!(bus.subscriber_count(), 100);
    }
}
