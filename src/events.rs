//! Terminal input thread and the UI event queue.
//!
//! Everything that wants to change what is on screen sends an [`AppEvent`] into the
//! queue; only the UI task (the main loop) drains it and mutates state. Background
//! fetches deliver their results as [`AppEvent::Complete`] callbacks.
//!
//! [`EventHandler`] spawns an OS thread (not a tokio task) because
//! `crossterm::event::poll()` blocks and would starve the async runtime. Drop signals
//! shutdown without joining to avoid deadlocking if `poll` blocks during unwinding.

use crate::model::Run;
use crate::task::UiCallback;
use crate::view::ViewId;
use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

pub type UiSender = mpsc::UnboundedSender<AppEvent>;
pub type UiReceiver = mpsc::UnboundedReceiver<AppEvent>;

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Tick,
    /// Next busy-indicator frame for a panel with an outstanding fetch.
    Busy { view: ViewId, frame: usize },
    /// A background fetch finished. The panel's busy indicator is cleared before
    /// the callback runs.
    Complete {
        view: ViewId,
        generation: u64,
        callback: UiCallback,
    },
    /// Background refresh timer fired.
    PollTick,
    /// A run reached a terminal state during a background refresh.
    RunFinished(Run),
    /// Global toast, auto-dismisses after `ERROR_TTL_SECS`.
    Error(String),
}

pub struct EventHandler {
    rx: UiReceiver,
    tx: UiSender,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let eventtx = tx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();

        let thread = std::thread::spawn(move || {
            while !shutdown_flag.load(Ordering::Relaxed) {
                match event::poll(tick_rate) {
                    Err(e) => {
                        let _ = eventtx.send(AppEvent::Error(format!("Terminal poll error: {e}")));
                        break;
                    }
                    Ok(false) => {
                        if eventtx.send(AppEvent::Tick).is_err() {
                            break;
                        }
                        continue;
                    }
                    Ok(true) => {}
                }
                match event::read() {
                    Ok(CrosstermEvent::Key(key)) => {
                        if eventtx.send(AppEvent::Key(key)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        let _ = eventtx.send(AppEvent::Error(format!("Terminal read error: {e}")));
                        break;
                    }
                    _ => {} // mouse, resize, focus
                }
            }
        });

        Self {
            rx,
            tx,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn sender(&self) -> UiSender {
        self.tx.clone()
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if let Err(payload) = handle.join() {
                tracing::error!("event thread panicked: {}", crate::task::panic_message(payload));
            }
        }
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        // Signal only; joining here could hang if poll() is blocked while unwinding.
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
