use crate::bus::{self, BusEvent, EventBus};
use crate::cascade::SelectionCascade;
use crate::diff;
use crate::error::Error;
use crate::events::{AppEvent, UiSender};
use crate::gateway::FeedGateway;
use crate::input::{Action, Focus, InputContext};
use crate::loader::ListLoader;
use crate::model::{Run, RunKind};
use crate::poller::backoff_delay;
use crate::task::{SupersedePolicy, TaskRunner};
use crate::view::{Panels, ViewId, ViewTarget};
use std::sync::Arc;
use std::time::Instant;

pub const NOTIFICATION_TTL_SECS: u64 = 5;
pub const ERROR_TTL_SECS: u64 = 10;
pub const NARROW_WIDTH_THRESHOLD: u16 = 80;
/// Lines moved by PageUp/PageDown in the log panel.
pub const PAGE_SCROLL: usize = 20;

/// Immutable configuration set at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workspace: String,
    pub repo: String,
    pub page_len: usize,
    pub poll_interval: u64,
    pub desktop_notify: bool,
    pub demo: bool,
    pub supersede: SupersedePolicy,
}

impl AppConfig {
    pub fn repo_label(&self) -> String {
        format!("{}/{}", self.workspace, self.repo)
    }
}

/// Everything a handler needs besides the state it mutates.
pub struct AppContext {
    pub config: AppConfig,
    pub gateway: Arc<dyn FeedGateway>,
    pub runner: TaskRunner,
    pub bus: EventBus<BusEvent>,
}

impl AppContext {
    /// Wires the runner and the bus to the UI queue. The bus starts with two
    /// subscribers: one queueing finished runs for the notification line and a
    /// `debug!` audit trail of every event.
    pub fn new(config: AppConfig, gateway: Arc<dyn FeedGateway>, tx: UiSender) -> Self {
        let runner = TaskRunner::new(tx.clone(), config.supersede);
        let bus = EventBus::new();
        bus.subscribe(move |event: BusEvent| {
            if let BusEvent::RunFinished(run) = event {
                if tx.send(AppEvent::RunFinished(run)).is_err() {
                    tracing::warn!("UI channel closed, dropping finished run");
                }
            }
        });
        bus.subscribe(|event: BusEvent| {
            tracing::debug!(target: "bbw::audit", "{}", bus::describe(&event));
        });
        Self {
            config,
            gateway,
            runner,
            bus,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub timestamp: Instant,
}

pub struct AppState {
    pub feed: RunKind,
    pub focus: Focus,
    pub pipelines: ListLoader,
    pub pull_requests: ListLoader,
    pub panels: Panels,
    pub cascade: SelectionCascade,

    // Polling
    pub last_poll: Option<Instant>,
    pub base_interval: u64,
    /// Interval the poller currently runs at; differs from `base_interval` while
    /// backing off.
    pub poll_interval: u64,
    pub refresh_failures: u32,

    // Transient UI
    pub notifications: Vec<Notification>,
    pub error: Option<(String, Instant)>,
    pub should_quit: bool,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            feed: RunKind::Pipeline,
            focus: Focus::List,
            pipelines: ListLoader::new(RunKind::Pipeline, config.page_len),
            pull_requests: ListLoader::new(RunKind::PullRequest, config.page_len),
            panels: Panels::default(),
            cascade: SelectionCascade::new(),
            last_poll: None,
            base_interval: config.poll_interval,
            poll_interval: config.poll_interval,
            refresh_failures: 0,
            notifications: Vec::new(),
            error: None,
            should_quit: false,
        }
    }

    pub fn loader(&self, feed: RunKind) -> &ListLoader {
        match feed {
            RunKind::Pipeline => &self.pipelines,
            RunKind::PullRequest => &self.pull_requests,
        }
    }

    pub fn active_loader(&self) -> &ListLoader {
        self.loader(self.feed)
    }

    /// The loader for `feed` together with the panels, borrowed disjointly.
    pub fn loader_parts(&mut self, feed: RunKind) -> (&mut ListLoader, &mut Panels) {
        let loader = match feed {
            RunKind::Pipeline => &mut self.pipelines,
            RunKind::PullRequest => &mut self.pull_requests,
        };
        (loader, &mut self.panels)
    }

    /// Load the first page of the active feed.
    pub fn start(&mut self, ctx: &AppContext) {
        let (loader, panels) = self.loader_parts(self.feed);
        let view = loader.view();
        loader.load_first(panels.get_mut(view), ctx);
    }

    /// Apply one non-key event from the UI queue.
    pub fn apply(&mut self, event: AppEvent, ctx: &AppContext) {
        match event {
            AppEvent::Key(_) => {}
            AppEvent::Tick => {
                self.prune_notifications();
                self.prune_error();
            }
            AppEvent::Busy { view, frame } => {
                if ctx.runner.is_outstanding(view) {
                    self.panels.get_mut(view).display_busy(frame);
                }
            }
            AppEvent::Complete {
                view,
                generation,
                callback,
            } => {
                if !ctx.runner.accepts(view, generation) {
                    tracing::debug!(?view, generation, "dropping superseded completion");
                    return;
                }
                ctx.runner.finish(view, generation);
                self.panels.get_mut(view).clear_busy();
                callback.invoke(self, ctx);
            }
            AppEvent::PollTick => self.on_poll_tick(ctx),
            AppEvent::RunFinished(run) => {
                self.notifications.push(Notification {
                    message: diff::transition_message(&run),
                    timestamp: Instant::now(),
                });
            }
            AppEvent::Error(e) => self.set_error(e),
        }
    }

    pub fn input_context(&self) -> InputContext {
        InputContext {
            has_error: self.error.is_some(),
            is_loading: self.is_loading(),
        }
    }

    /// `log_height` is the number of visible log lines, for scroll clamping.
    pub fn handle_action(&mut self, action: Action, ctx: &AppContext, log_height: usize) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::DismissError => self.clear_error(),
            Action::MoveDown => match self.focus {
                Focus::List => self.move_list_down(ctx),
                Focus::Steps => self.move_step(1, ctx),
                Focus::Log => self.log_panel().scroll_down(1, log_height),
            },
            Action::MoveUp => match self.focus {
                Focus::List => {
                    let (loader, _) = self.loader_parts(self.feed);
                    loader.move_up();
                }
                Focus::Steps => self.move_step(-1, ctx),
                Focus::Log => self.log_panel().scroll_up(1),
            },
            Action::PageDown if self.focus == Focus::Log => {
                self.log_panel().scroll_down(PAGE_SCROLL, log_height);
            }
            Action::PageUp if self.focus == Focus::Log => self.log_panel().scroll_up(PAGE_SCROLL),
            Action::ScrollToTop if self.focus == Focus::Log => self.log_panel().scroll_to_top(),
            Action::ScrollToBottom if self.focus == Focus::Log => {
                self.log_panel().scroll_to_bottom(log_height);
            }
            Action::PageDown | Action::PageUp | Action::ScrollToTop | Action::ScrollToBottom => {}
            Action::Select => match self.focus {
                Focus::List => self.select_current_run(ctx),
                Focus::Steps | Focus::Log => self.move_step(0, ctx),
            },
            Action::FocusNext => self.focus = self.focus.next(),
            Action::FocusPrev => self.focus = self.focus.prev(),
            Action::SwitchFeed => self.switch_feed(ctx),
            Action::Refresh => self.manual_refresh(ctx),
            Action::OpenBrowser => {
                if let Some(url) = self.selected_url() {
                    let tx = ctx.runner.sender();
                    tokio::spawn(async move {
                        if let Err(e) = open_in_browser(&url).await {
                            let _ = tx.send(AppEvent::Error(format!("Failed to open browser: {e}")));
                        }
                    });
                }
            }
            Action::None => {}
        }
    }

    fn log_panel(&mut self) -> &mut crate::view::Panel {
        self.panels.get_mut(ViewId::CommandLog)
    }

    fn move_list_down(&mut self, ctx: &AppContext) {
        let (loader, panels) = self.loader_parts(self.feed);
        if let Some(query) = loader.move_down() {
            let view = loader.view();
            loader.load_next(query, true, panels.get_mut(view), ctx);
        }
    }

    /// Select the step `delta` rows away from the current one. Stays put at either
    /// end of the list.
    fn move_step(&mut self, delta: isize, ctx: &AppContext) {
        let Some(current) = self.cascade.selected_step_index() else {
            return;
        };
        let len = self.cascade.selection().steps.len();
        let target = isize::try_from(current).unwrap_or(0) + delta;
        if target < 0 || usize::try_from(target).is_ok_and(|t| t >= len) {
            return;
        }
        let AppState {
            cascade, panels, ..
        } = self;
        cascade.select_step(target, panels, ctx);
    }

    fn select_current_run(&mut self, ctx: &AppContext) {
        let AppState {
            feed,
            pipelines,
            pull_requests,
            cascade,
            panels,
            ..
        } = self;
        let loader = match feed {
            RunKind::Pipeline => pipelines,
            RunKind::PullRequest => pull_requests,
        };
        cascade.select_run(loader.items(), loader.selected_row(), panels, ctx);
    }

    /// Toggle between the pipeline and pull-request feeds. A feed is loaded the
    /// first time it is shown.
    pub fn switch_feed(&mut self, ctx: &AppContext) {
        self.feed = match self.feed {
            RunKind::Pipeline => RunKind::PullRequest,
            RunKind::PullRequest => RunKind::Pipeline,
        };
        self.focus = Focus::List;
        self.cascade.reset(&mut self.panels);
        let (loader, panels) = self.loader_parts(self.feed);
        if loader.items().is_empty() && loader.pagination().is_none() && !loader.is_loading() {
            let view = loader.view();
            loader.load_first(panels.get_mut(view), ctx);
        }
    }

    /// Start the focused feed over from page one and re-fetch the selection.
    pub fn manual_refresh(&mut self, ctx: &AppContext) {
        let (loader, panels) = self.loader_parts(self.feed);
        loader.reset();
        let view = loader.view();
        panels.get_mut(view).clear();
        loader.load_first(panels.get_mut(view), ctx);
        let AppState {
            cascade, panels, ..
        } = self;
        cascade.refresh(panels, ctx);
        self.last_poll = Some(Instant::now());
    }

    fn on_poll_tick(&mut self, ctx: &AppContext) {
        self.last_poll = Some(Instant::now());
        let (loader, panels) = self.loader_parts(self.feed);
        let view = loader.view();
        if !loader.refresh_in_place(panels.get_mut(view), ctx) {
            tracing::debug!(?view, "refresh skipped, list fetch in flight");
        }
        let AppState {
            cascade, panels, ..
        } = self;
        cascade.refresh(panels, ctx);
    }

    /// A background refresh of `feed` landed; drops any error left on its list.
    pub fn refresh_succeeded(&mut self, feed: RunKind) {
        self.refresh_failures = 0;
        self.panels.get_mut(crate::loader::feed_view(feed)).clear();
    }

    pub fn refresh_failed(&mut self, err: &Error) {
        self.refresh_failures = self.refresh_failures.saturating_add(1);
        let retry_in = self.desired_poll_interval();
        self.set_error(format!(
            "Refresh failed, retrying in {retry_in}s: {}",
            err.panel_message()
        ));
    }

    /// The interval the poller should use now: the base interval, or a backed-off
    /// one after consecutive refresh failures.
    pub fn desired_poll_interval(&self) -> u64 {
        if self.refresh_failures > 0 {
            backoff_delay(self.base_interval, self.refresh_failures)
        } else {
            self.base_interval
        }
    }

    /// Seconds until the next background refresh, if one has happened yet.
    pub fn next_poll_in(&self) -> Option<u64> {
        self.last_poll
            .map(|t| self.poll_interval.saturating_sub(t.elapsed().as_secs()))
    }

    pub fn selected_run(&self) -> Option<&Run> {
        self.active_loader().selected()
    }

    /// Browser URL for what the focused panel shows.
    pub fn selected_url(&self) -> Option<String> {
        match self.focus {
            Focus::List => self.selected_run().map(|r| r.url.clone()),
            Focus::Steps | Focus::Log => {
                let selection = self.cascade.selection();
                selection
                    .step
                    .as_ref()
                    .and_then(|s| s.url.clone())
                    .or_else(|| selection.run.as_ref().map(|r| r.url.clone()))
            }
        }
        .filter(|url| !url.is_empty())
    }

    pub fn is_loading(&self) -> bool {
        self.active_loader().is_loading()
    }

    pub fn prune_notifications(&mut self) {
        let now = Instant::now();
        self.notifications
            .retain(|n| now.duration_since(n.timestamp).as_secs() < NOTIFICATION_TTL_SECS);
    }

    pub fn set_error(&mut self, msg: String) {
        self.error = Some((msg, Instant::now()));
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn prune_error(&mut self) {
        if let Some((_, ts)) = &self.error {
            if ts.elapsed().as_secs() >= ERROR_TTL_SECS {
                self.error = None;
            }
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|(msg, _)| msg.as_str())
    }
}

async fn open_in_browser(url: &str) -> std::io::Result<()> {
    let (cmd, args): (&str, Vec<&str>) = if cfg!(target_os = "macos") {
        ("open", vec![url])
    } else if cfg!(target_os = "windows") {
        ("cmd", vec!["/C", "start", url])
    } else {
        ("xdg-open", vec![url])
    };
    tokio::process::Command::new(cmd).args(&args).spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> AppConfig {
        AppConfig {
            workspace: "acme".into(),
            repo: "api".into(),
            page_len: 10,
            poll_interval: 10,
            desktop_notify: false,
            demo: true,
            supersede: SupersedePolicy::LastWriteWins,
        }
    }

    #[test]
    fn new_state_starts_on_pipelines() {
        let state = AppState::new(&config());
        assert_eq!(state.feed, RunKind::Pipeline);
        assert_eq!(state.focus, Focus::List);
        assert!(state.active_loader().items().is_empty());
        assert_eq!(config().repo_label(), "acme/api");
    }

    #[test]
    fn error_expires() {
        let mut state = AppState::new(&config());
        state.set_error("boom".into());
        assert_eq!(state.error_message(), Some("boom"));
        state.prune_error();
        assert!(state.error.is_some());
        state.error = Some((
            "old".into(),
            Instant::now() - Duration::from_secs(ERROR_TTL_SECS + 1),
        ));
        state.prune_error();
        assert!(state.error.is_none());
    }

    #[test]
    fn notifications_expire() {
        let mut state = AppState::new(&config());
        state.notifications.push(Notification {
            message: "fresh".into(),
            timestamp: Instant::now(),
        });
        state.notifications.push(Notification {
            message: "stale".into(),
            timestamp: Instant::now() - Duration::from_secs(NOTIFICATION_TTL_SECS + 1),
        });
        state.prune_notifications();
        assert_eq!(state.notifications.len(), 1);
        assert_eq!(state.notifications[0].message, "fresh");
    }

    #[test]
    fn backoff_after_failures() {
        let mut state = AppState::new(&config());
        assert_eq!(state.desired_poll_interval(), 10);
        state.refresh_failed(&Error::Network("down".into()));
        assert_eq!(state.desired_poll_interval(), 20);
        assert!(state.error_message().unwrap().contains("retrying in 20s"));
        state.refresh_failed(&Error::Network("down".into()));
        assert_eq!(state.desired_poll_interval(), 40);
        state.refresh_succeeded(RunKind::Pipeline);
        assert_eq!(state.desired_poll_interval(), 10);
    }

    #[test]
    fn refresh_clears_the_refreshed_feed_only() {
        let mut state = AppState::new(&config());
        state
            .panels
            .get_mut(ViewId::Pipelines)
            .display_error(&Error::Network("down".into()));
        state
            .panels
            .get_mut(ViewId::PullRequests)
            .display_text("PR error".into());
        state.feed = RunKind::PullRequest;

        state.refresh_succeeded(RunKind::Pipeline);
        assert!(state.panels.get(ViewId::Pipelines).is_empty());
        assert_eq!(state.panels.get(ViewId::PullRequests).text(), Some("PR error"));
    }

    fn finished_run() -> Run {
        Run {
            id: "{pipeline-7}".into(),
            kind: RunKind::Pipeline,
            number: 7,
            title: "Build #7".into(),
            state: crate::status::StepState::PASSED,
            created_at: chrono::Utc::now(),
            completed_at: Some(chrono::Utc::now()),
            target: crate::model::Target {
                branch: "main".into(),
                commit: None,
            },
            duration_secs: Some(42),
            author: "dev".into(),
            url: String::new(),
        }
    }

    #[tokio::test]
    async fn only_finished_runs_reach_the_ui_queue() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = AppContext::new(
            config(),
            Arc::new(crate::gateway::SimulatedGateway::new(
                Arc::new(crate::status::SystemClock),
                Duration::from_secs(5),
            )),
            tx,
        );
        let run = finished_run();

        ctx.bus.publish(BusEvent::RunSelected {
            kind: run.kind,
            run_id: run.id.clone(),
            title: run.display_title(),
        });
        ctx.bus.publish(BusEvent::RunFinished(run.clone()));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AppEvent::RunFinished(r) if r.id == run.id));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn focus_actions_do_not_need_a_runtime() {
        let mut state = AppState::new(&config());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = AppContext::new(
            config(),
            Arc::new(crate::gateway::SimulatedGateway::new(
                Arc::new(crate::status::SystemClock),
                Duration::from_secs(5),
            )),
            tx,
        );
        state.handle_action(Action::FocusNext, &ctx, 10);
        assert_eq!(state.focus, Focus::Steps);
        state.handle_action(Action::FocusNext, &ctx, 10);
        state.handle_action(Action::MoveDown, &ctx, 10);
        assert_eq!(state.panels.get(ViewId::CommandLog).scroll, 0);
        state.handle_action(Action::Quit, &ctx, 10);
        assert!(state.should_quit);
    }
}
