//! Background fetches bound to a panel.
//!
//! [`TaskRunner::run`] marks the target panel busy, runs the fetch off the UI task,
//! animates the busy indicator while it is outstanding and, once it resolves, queues
//! the completion callback for the UI task. The callback always runs after the
//! panel's busy indicator has been cleared.
//!
//! Two fetches bound to the same panel are not coordinated by default: whichever
//! completes last writes last. With [`SupersedePolicy::CancelPrevious`] starting a
//! new fetch cancels the previous one for that panel, [`TaskRunner::cancel`] drops a
//! panel's outstanding fetch outright, and a cancelled fetch delivers nothing.

use crate::app::{AppContext, AppState};
use crate::error::{Error, Result};
use crate::events::{AppEvent, UiSender};
use crate::view::{ViewId, ViewTarget};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How often the busy indicator advances.
pub const BUSY_TICK: Duration = Duration::from_millis(100);

type Callback = Box<dyn FnOnce(&mut AppState, &AppContext) + Send>;

/// Work to be applied on the UI task.
pub struct UiCallback(Callback);

impl UiCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut AppState, &AppContext) + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn invoke(self, state: &mut AppState, ctx: &AppContext) {
        (self.0)(state, ctx);
    }
}

impl fmt::Debug for UiCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UiCallback")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupersedePolicy {
    /// Stale completions still write; the last one to finish wins.
    #[default]
    LastWriteWins,
    /// A new fetch for a panel cancels the outstanding one.
    CancelPrevious,
}

pub struct TaskRunner {
    tx: UiSender,
    policy: SupersedePolicy,
    tick: Duration,
    next_generation: AtomicU64,
    in_flight: Mutex<HashMap<ViewId, (u64, CancellationToken)>>,
}

impl TaskRunner {
    pub fn new(tx: UiSender, policy: SupersedePolicy) -> Self {
        Self {
            tx,
            policy,
            tick: BUSY_TICK,
            next_generation: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn policy(&self) -> SupersedePolicy {
        self.policy
    }

    pub fn sender(&self) -> UiSender {
        self.tx.clone()
    }

    /// Start `fetch` bound to `target`. Must be called from the UI task, inside a
    /// tokio runtime. Returns the generation assigned to this fetch.
    pub fn run<T, F, C>(&self, target: &mut dyn ViewTarget, fetch: F, on_complete: C) -> u64
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(&mut AppState, &AppContext, Result<T>) + Send + 'static,
    {
        let view = target.id();
        target.display_busy(0);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(view, (generation, token.clone()));
        if let Some((prev_generation, prev_token)) = previous {
            if self.policy == SupersedePolicy::CancelPrevious {
                tracing::debug!(?view, prev_generation, "cancelling superseded fetch");
                prev_token.cancel();
            }
        }

        let tx = self.tx.clone();
        let tick = self.tick;
        tokio::spawn(async move {
            let mut fetch = tokio::spawn(fetch);
            let mut ticker = time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick is immediate; frame 0 is already on screen.
            ticker.tick().await;
            let mut frame = 0usize;

            let joined = loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        fetch.abort();
                        return;
                    }
                    joined = &mut fetch => break joined,
                    _ = ticker.tick() => {
                        frame = frame.wrapping_add(1);
                        if tx.send(AppEvent::Busy { view, frame }).is_err() {
                            fetch.abort();
                            return;
                        }
                    }
                }
            };
            drop(ticker);

            let result = flatten_join(joined);
            if let Err(e) = &result {
                tracing::debug!(?view, generation, error = %e, "fetch failed");
            }
            let callback = UiCallback::new(move |state, ctx| on_complete(state, ctx, result));
            if tx
                .send(AppEvent::Complete {
                    view,
                    generation,
                    callback,
                })
                .is_err()
            {
                tracing::warn!(?view, "UI channel closed before completion was delivered");
            }
        });

        generation
    }

    /// Forget `generation` for `view` if it is still the newest fetch for that panel.
    pub fn finish(&self, view: ViewId, generation: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&view).is_some_and(|(g, _)| *g == generation) {
            in_flight.remove(&view);
        }
    }

    /// Cancel the outstanding fetch for `view`. Only acts under
    /// [`SupersedePolicy::CancelPrevious`]; returns whether a fetch was cancelled.
    pub fn cancel(&self, view: ViewId) -> bool {
        if self.policy != SupersedePolicy::CancelPrevious {
            return false;
        }
        let cancelled = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&view);
        match cancelled {
            Some((generation, token)) => {
                tracing::debug!(?view, generation, "cancelling fetch");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a completion for `generation` should still be applied. Under
    /// [`SupersedePolicy::CancelPrevious`] a completion that was already queued when
    /// its fetch got superseded or cancelled is dropped.
    pub fn accepts(&self, view: ViewId, generation: u64) -> bool {
        self.policy == SupersedePolicy::LastWriteWins
            || self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&view)
                .is_some_and(|(g, _)| *g == generation)
    }

    pub fn is_outstanding(&self, view: ViewId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&view)
    }
}

/// A panicked or aborted fetch becomes [`Error::Task`].
pub fn flatten_join<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(Error::Task(panic_message(e.into_panic()))),
        Err(e) => Err(Error::Task(e.to_string())),
    }
}

pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Panel;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn busy_frames_then_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = TaskRunner::new(tx, SupersedePolicy::LastWriteWins);
        let mut panel = Panel::new(ViewId::Steps);

        let generation = runner.run(
            &mut panel,
            async {
                time::sleep(Duration::from_millis(350)).await;
                Ok(42)
            },
            |_, _, _: Result<i32>| {},
        );
        assert_eq!(panel.busy, Some(0), "busy must be shown synchronously");
        assert!(runner.is_outstanding(ViewId::Steps));

        let mut frames = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                AppEvent::Busy { view, frame } => {
                    assert_eq!(view, ViewId::Steps);
                    frames.push(frame);
                }
                AppEvent::Complete {
                    view, generation: g, ..
                } => {
                    assert_eq!(view, ViewId::Steps);
                    assert_eq!(g, generation);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(frames.len() >= 2, "expected animation, got {frames:?}");
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(frames[0], 1);

        runner.finish(ViewId::Steps, generation);
        assert!(!runner.is_outstanding(ViewId::Steps));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_previous_delivers_only_newest() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = TaskRunner::new(tx, SupersedePolicy::CancelPrevious);
        let mut panel = Panel::new(ViewId::StepDetail);

        let first = runner.run(
            &mut panel,
            async {
                time::sleep(Duration::from_millis(500)).await;
                Ok(1)
            },
            |_, _, _: Result<i32>| {},
        );
        let second = runner.run(
            &mut panel,
            async {
                time::sleep(Duration::from_millis(50)).await;
                Ok(2)
            },
            |_, _, _: Result<i32>| {},
        );
        assert_ne!(first, second);

        let mut completions = Vec::new();
        let deadline = time::sleep(Duration::from_secs(2));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => break,
                event = rx.recv() => match event {
                    Some(AppEvent::Complete { generation, .. }) => completions.push(generation),
                    Some(_) => {}
                    None => break,
                },
            }
        }
        assert_eq!(completions, vec![second]);
    }

    #[tokio::test]
    async fn finishing_an_older_generation_keeps_the_newer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = TaskRunner::new(tx, SupersedePolicy::LastWriteWins);
        let mut panel = Panel::new(ViewId::CommandLog);
        let older = runner.run(&mut panel, std::future::pending::<Result<()>>(), |_, _, _| {});
        let _newer = runner.run(&mut panel, std::future::pending::<Result<()>>(), |_, _, _| {});
        runner.finish(ViewId::CommandLog, older);
        assert!(runner.is_outstanding(ViewId::CommandLog));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_fetch_delivers_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = TaskRunner::new(tx, SupersedePolicy::CancelPrevious);
        let mut panel = Panel::new(ViewId::StepDetail);
        let generation = runner.run(
            &mut panel,
            async {
                time::sleep(Duration::from_millis(200)).await;
                Ok(1)
            },
            |_, _, _: Result<i32>| {},
        );

        assert!(runner.cancel(ViewId::StepDetail));
        assert!(!runner.is_outstanding(ViewId::StepDetail));
        assert!(!runner.accepts(ViewId::StepDetail, generation));
        assert!(!runner.cancel(ViewId::StepDetail), "nothing left to cancel");

        time::sleep(Duration::from_secs(1)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, AppEvent::Complete { .. }),
                "cancelled fetch completed"
            );
        }
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_when_last_write_wins() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = TaskRunner::new(tx, SupersedePolicy::LastWriteWins);
        let mut panel = Panel::new(ViewId::CommandLog);
        let older = runner.run(&mut panel, std::future::pending::<Result<()>>(), |_, _, _| {});
        let _newer = runner.run(&mut panel, std::future::pending::<Result<()>>(), |_, _, _| {});
        assert!(!runner.cancel(ViewId::CommandLog));
        assert!(runner.is_outstanding(ViewId::CommandLog));
        assert!(runner.accepts(ViewId::CommandLog, older));
    }

    #[tokio::test]
    async fn panicking_fetch_becomes_task_error() {
        let joined = tokio::spawn(async {
            if true {
                panic!("parser exploded");
            }
            Ok::<u8, Error>(0)
        })
        .await;
        assert_eq!(
            flatten_join(joined),
            Err(Error::Task("parser exploded".into()))
        );
    }

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
