use bbw::app::{AppConfig, AppContext, AppState};
use bbw::cli::{self, Cli};
use bbw::events::{AppEvent, EventHandler, UiSender};
use bbw::gateway::{BitbucketGateway, Credentials, FeedGateway, SimulatedGateway};
use bbw::input;
use bbw::poller::Poller;
use bbw::status::SystemClock;
use bbw::task::{self, SupersedePolicy};
use bbw::tui;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen, SetTitle};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Simulated round-trip so the demo shows busy indicators.
const DEMO_LATENCY: Duration = Duration::from_millis(400);

fn setup_verbose_logging() -> Result<()> {
    let state_dir = dirs_next_or_fallback();
    std::fs::create_dir_all(&state_dir)
        .map_err(|e| eyre!("Failed to create log directory {state_dir:?}: {e}"))?;
    let log_path = state_dir.join("debug.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| eyre!("Failed to open log file {log_path:?}: {e}"))?;
    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();
    tracing::info!(
        "bbw v{} starting with verbose logging",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

fn dirs_next_or_fallback() -> std::path::PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        std::path::PathBuf::from(state).join("bbw")
    } else if let Some(home) = std::env::var_os("HOME") {
        std::path::PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("bbw")
    } else {
        std::path::PathBuf::from("/tmp/bbw")
    }
}

fn spawn_monitored(tx: UiSender, label: &'static str, fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(async move {
        let handle = tokio::spawn(fut);
        if let Err(join_err) = handle.await {
            let msg = if join_err.is_panic() {
                task::panic_message(join_err.into_panic())
            } else {
                "task cancelled".to_string()
            };
            tracing::error!("{label} panicked: {msg}");
            if tx
                .send(AppEvent::Error(format!("{label} crashed: {msg}")))
                .is_err()
            {
                tracing::warn!("{label}: channel closed while reporting panic");
            }
        }
    });
}

#[cfg(feature = "desktop-notify")]
fn subscribe_desktop_notifier(ctx: &AppContext) {
    ctx.bus.subscribe(|event| {
        if let bbw::bus::BusEvent::RunFinished(run) = event {
            bbw::notify::send_desktop(&run);
        }
    });
}

#[cfg(not(feature = "desktop-notify"))]
fn subscribe_desktop_notifier(_ctx: &AppContext) {}

/// Everything decided before the terminal is taken over.
fn build_config(args: &Cli) -> Result<(AppConfig, Arc<dyn FeedGateway>)> {
    let (workspace, repo, gateway): (String, String, Arc<dyn FeedGateway>) = if args.demo {
        let gateway = SimulatedGateway::new(
            Arc::new(SystemClock),
            Duration::from_secs(args.step_poll),
        )
        .with_latency(DEMO_LATENCY);
        ("demo".to_string(), "sandbox".to_string(), Arc::new(gateway))
    } else {
        let repo_arg = args
            .repo
            .as_deref()
            .ok_or_else(|| eyre!("--repo is required unless --demo is given"))?;
        let (workspace, repo) =
            cli::resolve_repo(args.workspace.as_deref(), repo_arg).map_err(|e| eyre!(e))?;
        let credentials = Credentials::from_env().ok_or_else(|| {
            eyre!("Set BITBUCKET_USERNAME and BITBUCKET_APP_PASSWORD, or run with --demo")
        })?;
        let gateway = BitbucketGateway::new(&workspace, &repo, Some(credentials))?;
        (workspace, repo, Arc::new(gateway))
    };

    let config = AppConfig {
        workspace,
        repo,
        page_len: usize::try_from(args.page_len)?,
        poll_interval: args.interval,
        desktop_notify: !args.no_notify && cfg!(feature = "desktop-notify"),
        demo: args.demo,
        supersede: if args.cancel_superseded {
            SupersedePolicy::CancelPrevious
        } else {
            SupersedePolicy::LastWriteWins
        },
    };
    Ok((config, gateway))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    if args.verbose {
        setup_verbose_logging()?;
    }

    let (config, gateway) = build_config(&args)?;
    tracing::info!(repo = %config.repo_label(), demo = config.demo, policy = ?config.supersede,
        "configuration loaded");

    // Setup terminal with panic hook
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if let Err(e) = terminal::disable_raw_mode() {
            eprintln!("Failed to disable raw mode during panic: {e}");
        }
        if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, SetTitle("")) {
            eprintln!("Failed to leave alternate screen during panic: {e}");
        }
        original_hook(panic_info);
    }));

    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        SetTitle(format!("watching {}", config.repo_label()))
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let events = EventHandler::new(Duration::from_millis(100));
    let tx = events.sender();

    let base_interval = config.poll_interval;
    let ctx = AppContext::new(config, gateway, tx.clone());
    if ctx.config.desktop_notify {
        subscribe_desktop_notifier(&ctx);
    }

    let (interval_tx, interval_rx) = watch::channel(base_interval);
    spawn_monitored(tx.clone(), "poller", Poller::new(tx.clone(), interval_rx).run());

    let mut state = AppState::new(&ctx.config);
    state.start(&ctx);

    let result = run_app(&mut terminal, &mut state, &ctx, events, &interval_tx).await;

    // Restore terminal
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, SetTitle(""))?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState,
    ctx: &AppContext,
    mut events: EventHandler,
    interval_tx: &watch::Sender<u64>,
) -> Result<()> {
    loop {
        terminal.draw(|f| tui::render::render(f, state, ctx))?;

        let Some(event) = events.next().await else {
            break;
        };
        match event {
            AppEvent::Key(key) => {
                let action = input::map_key(key, &state.input_context());
                let size = terminal.size()?;
                let log_height = tui::render::log_height(size.width, size.height);
                state.handle_action(action, ctx, log_height);
            }
            other => state.apply(other, ctx),
        }

        let interval = state.desired_poll_interval();
        if interval != state.poll_interval {
            tracing::debug!(from = state.poll_interval, to = interval, "poll interval changed");
            state.poll_interval = interval;
            if interval_tx.send(interval).is_err() {
                tracing::warn!("poller stopped, interval change dropped");
            }
        }

        if state.should_quit {
            break;
        }
    }

    events.stop();
    tracing::info!(
        notifications = state.notifications.len(),
        "shutting down after {} refresh failures",
        state.refresh_failures
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_config_needs_no_credentials() {
        let args = Cli::try_parse_from(["bbw", "--demo", "--cancel-superseded", "-n", "5"]).unwrap();
        let (config, _) = build_config(&args).unwrap();
        assert_eq!(config.repo_label(), "demo/sandbox");
        assert_eq!(config.page_len, 5);
        assert_eq!(config.supersede, SupersedePolicy::CancelPrevious);
    }

    #[test]
    fn log_dir_ends_in_bbw() {
        assert!(dirs_next_or_fallback().ends_with("bbw"));
    }
}
