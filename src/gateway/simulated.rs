//! Offline feed for `--demo` and tests.
//!
//! Each simulated step carries a snapshot timeline; the state a fetch reports is
//! the snapshot reached after the number of poll intervals elapsed since that step
//! was first observed. A pipeline's status is always the aggregate of its steps.

use super::FeedGateway;
use crate::error::{Error, Result};
use crate::model::{Page, Run, RunKind, Step, StepCommand, Target};
use crate::pagination::{query_param, Pagination};
use crate::status::{
    derive_aggregate_status, poll_count_since, simulated_state_at, Clock, PollClock, StepState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const SIM_API: &str = "sim://bitbucket/2.0/repositories/demo/sandbox";
const SIM_WEB: &str = "https://bitbucket.org/demo/sandbox";
pub const PIPELINE_COUNT: usize = 23;
pub const PULL_REQUEST_COUNT: usize = 8;
const DEFAULT_PAGE_LEN: usize = 10;

const P: StepState = StepState::PENDING;
const R: StepState = StepState::IN_PROGRESS;
const OK: StepState = StepState::PASSED;
const KO: StepState = StepState::FAILED;

struct SimRun {
    run: Run,
    steps: Vec<Step>,
}

pub struct SimulatedGateway {
    polls: PollClock,
    latency: Duration,
    pipelines: Vec<SimRun>,
    pull_requests: Vec<SimRun>,
}

impl SimulatedGateway {
    /// The canned demo repository.
    pub fn new(clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        let base = clock.now();
        let pipelines = (0..PIPELINE_COUNT).map(|i| canned_pipeline(i, base)).collect();
        let pull_requests = (0..PULL_REQUEST_COUNT)
            .map(|i| canned_pull_request(i, base))
            .collect();
        Self {
            polls: PollClock::new(clock, poll_interval),
            latency: Duration::ZERO,
            pipelines,
            pull_requests,
        }
    }

    /// A feed made of exactly the given runs and their steps.
    pub fn from_runs(
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        pipelines: Vec<(Run, Vec<Step>)>,
        pull_requests: Vec<(Run, Vec<Step>)>,
    ) -> Self {
        let wrap = |runs: Vec<(Run, Vec<Step>)>| {
            runs.into_iter()
                .map(|(run, steps)| SimRun { run, steps })
                .collect::<Vec<_>>()
        };
        Self {
            polls: PollClock::new(clock, poll_interval),
            latency: Duration::ZERO,
            pipelines: wrap(pipelines),
            pull_requests: wrap(pull_requests),
        }
    }

    /// Delay every fetch, so busy indicators are visible in the demo.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn poll_clock(&self) -> &PollClock {
        &self.polls
    }

    fn feed(&self, kind: RunKind) -> &[SimRun] {
        match kind {
            RunKind::Pipeline => &self.pipelines,
            RunKind::PullRequest => &self.pull_requests,
        }
    }

    fn find(&self, run: &Run) -> Result<&SimRun> {
        self.feed(run.kind)
            .iter()
            .find(|s| s.run.id == run.id)
            .ok_or_else(|| Error::NotFound(format!("run {}", run.id)))
    }

    fn find_step<'a>(&self, sim: &'a SimRun, step_id: &str) -> Result<&'a Step> {
        sim.steps
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))
    }

    fn at_poll(&self, first: DateTime<Utc>, polls: usize) -> DateTime<Utc> {
        let interval_ms = i64::try_from(self.polls.interval().as_millis()).unwrap_or(i64::MAX);
        let polls = i64::try_from(polls).unwrap_or(i64::MAX);
        first + chrono::Duration::milliseconds(interval_ms.saturating_mul(polls))
    }

    fn live_step(&self, template: &Step) -> Step {
        let mut step = template.clone();
        if template.snapshots.is_empty() {
            return step;
        }
        // One reading of the clock, so state and timestamps describe the same poll.
        let first = self.polls.observe(&template.id);
        let now = self.polls.now();
        let interval = self.polls.interval();
        step.state = simulated_state_at(&template.snapshots, first, now, interval)
            .unwrap_or(StepState::UNKNOWN);
        let reached = usize::try_from(poll_count_since(first, now, interval))
            .unwrap_or(usize::MAX)
            .min(template.snapshots.len() - 1);
        let seen = &template.snapshots[..=reached];
        step.started_at = seen
            .iter()
            .position(|s| s.status != crate::status::Status::Pending)
            .map(|pos| self.at_poll(first, pos));
        step.completed_at = seen
            .iter()
            .position(|s| s.is_terminal())
            .map(|pos| self.at_poll(first, pos));
        step
    }

    fn live_steps(&self, sim: &SimRun) -> Vec<Step> {
        sim.steps.iter().map(|s| self.live_step(s)).collect()
    }

    fn live_run(&self, sim: &SimRun) -> Run {
        let mut run = sim.run.clone();
        if run.kind == RunKind::Pipeline && !sim.steps.is_empty() {
            let steps = self.live_steps(sim);
            run.state = derive_aggregate_status(steps.iter().map(|s| &s.state));
            run.completed_at = if run.state.is_terminal() {
                steps.iter().filter_map(|s| s.completed_at).max()
            } else {
                None
            };
            run.duration_secs = run.completed_at.and_then(|end| {
                u64::try_from(end.signed_duration_since(run.created_at).num_seconds()).ok()
            });
        }
        run
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl FeedGateway for SimulatedGateway {
    async fn fetch_page(&self, feed: RunKind, query: &str) -> Result<Page> {
        self.simulate_latency().await;
        let page = query_param(query, "page")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let page_len = query_param(query, "pagelen")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(DEFAULT_PAGE_LEN)
            .clamp(1, 100);

        let all = self.feed(feed);
        let start = (page - 1).saturating_mul(page_len).min(all.len());
        let end = start.saturating_add(page_len).min(all.len());
        let runs = all[start..end].iter().map(|s| self.live_run(s)).collect();
        let path = match feed {
            RunKind::Pipeline => "pipelines/",
            RunKind::PullRequest => "pullrequests",
        };
        let next = (end < all.len())
            .then(|| format!("{SIM_API}/{path}?page={}&pagelen={page_len}", page + 1));
        Ok(Page {
            runs,
            pagination: Pagination::new(all.len(), page_len, page - 1, next),
        })
    }

    async fn fetch_steps(&self, run: &Run) -> Result<Vec<Step>> {
        self.simulate_latency().await;
        let sim = self.find(run)?;
        Ok(self.live_steps(sim))
    }

    async fn fetch_step_detail(&self, run: &Run, step_id: &str) -> Result<Step> {
        self.simulate_latency().await;
        let sim = self.find(run)?;
        Ok(self.live_step(self.find_step(sim, step_id)?))
    }

    async fn fetch_step_log(&self, run: &Run, step_id: &str) -> Result<String> {
        self.simulate_latency().await;
        let sim = self.find(run)?;
        let step = self.live_step(self.find_step(sim, step_id)?);
        if !step.has_log {
            return Err(Error::NotFound(format!("log for external check {step_id}")));
        }
        Ok(render_log(&step))
    }
}

/// Log text for a step as far as it has progressed.
fn render_log(step: &Step) -> String {
    if step.state.status == crate::status::Status::Pending {
        return "Step has not started yet.".to_string();
    }
    let mut out = Vec::new();
    if let Some(image) = &step.image {
        out.push(format!("Images used:\n    build : docker.io/library/{image}"));
    }
    let shown = if step.state.is_terminal() {
        step.commands.len()
    } else {
        step.commands.len().div_ceil(2)
    };
    for (i, cmd) in step.commands.iter().take(shown).enumerate() {
        out.push(format!("+ {}", cmd.command));
        let last = i + 1 == step.commands.len();
        if last && step.state.is_failed() {
            out.push(format!("{}: 3 checks failed", cmd.name));
            out.push("Command exited with status 1".to_string());
        } else {
            out.push(format!("{}: ok", cmd.name));
        }
    }
    if !step.state.is_terminal() {
        out.push("...".to_string());
    }
    out.join("\n")
}

fn commands_for(name: &str) -> Vec<StepCommand> {
    let cmds: &[(&str, &str)] = match name {
        "Build" => &[("install", "npm ci"), ("build", "npm run build")],
        "Test" => &[
            ("unit", "npm test -- --ci"),
            ("coverage", "npm run coverage"),
        ],
        "Lint" => &[("lint", "npm run lint")],
        "Deploy" => &[("deploy", "./scripts/deploy.sh staging")],
        _ => &[],
    };
    cmds.iter()
        .map(|(name, command)| StepCommand {
            name: (*name).to_string(),
            command: (*command).to_string(),
        })
        .collect()
}

/// Snapshot timelines for pipeline `i`: the newest few are still moving.
fn timelines(i: usize, names: &[&str]) -> Vec<Vec<StepState>> {
    match i {
        0 => vec![
            vec![P, R, R, OK],
            vec![P, P, P, R, R, R, OK],
            vec![P, P, P, P, P, P, P, R, R, OK],
        ],
        1 => vec![vec![P, R, OK], vec![P, P, R, R, KO], vec![P]],
        2 => vec![vec![R, R, R, R, R, R, R, R, OK], vec![P]],
        _ if i % 5 == 4 => names
            .iter()
            .map(|n| if *n == "Test" { vec![KO] } else { vec![OK] })
            .collect(),
        _ => names.iter().map(|_| vec![OK]).collect(),
    }
}

fn canned_pipeline(i: usize, base: DateTime<Utc>) -> SimRun {
    let number = (100 + PIPELINE_COUNT - i) as u64;
    let id = format!("{{sim-pipeline-{number:04}}}");
    let names: &[&str] = if i % 3 == 2 {
        &["Lint", "Build"]
    } else {
        &["Build", "Test", "Deploy"]
    };
    let branch = match i % 4 {
        0 => "main",
        1 => "feature/retry-queue",
        2 => "fix/flaky-login",
        _ => "release/2.4",
    };
    let steps = names
        .iter()
        .zip(timelines(i, names))
        .enumerate()
        .map(|(j, (name, snapshots))| {
            let mut step = Step::new(format!("{{sim-step-{number:04}-{j}}}"), &id, *name);
            step.state = snapshots[0];
            step.snapshots = snapshots;
            step.commands = commands_for(name);
            step.image = Some("node:20".to_string());
            step
        })
        .collect();
    let minutes = i64::try_from(i).unwrap_or(0) * 37;
    SimRun {
        run: Run {
            id,
            kind: RunKind::Pipeline,
            number,
            title: branch.to_string(),
            state: StepState::PENDING,
            created_at: base - chrono::Duration::minutes(minutes),
            completed_at: None,
            target: Target {
                branch: branch.to_string(),
                commit: Some(format!("{:040x}", number * 7_919)),
            },
            duration_secs: None,
            author: ["Dana", "Sam", "Kim"][i % 3].to_string(),
            url: format!("{SIM_WEB}/pipelines/results/{number}"),
        },
        steps,
    }
}

fn canned_pull_request(i: usize, base: DateTime<Utc>) -> SimRun {
    const TITLES: [&str; PULL_REQUEST_COUNT] = [
        "Retry failed webhooks with backoff",
        "Fix flaky login test",
        "Bump node image to 20",
        "Add deploy step for staging",
        "Cache npm between steps",
        "Document release process",
        "Drop legacy auth endpoint",
        "Speed up lint step",
    ];
    let number = (60 - i) as u64;
    let id = number.to_string();
    let (state, checks): (StepState, Vec<Vec<StepState>>) = match i {
        0 => (P, vec![vec![P, R, R, OK], vec![P, R, R, R, KO]]),
        1 => (P, vec![vec![R, R, OK]]),
        5 => (
            StepState::new(
                crate::status::Status::Unknown,
                Some(crate::status::RunResult::Stopped),
            ),
            vec![vec![KO]],
        ),
        _ if i % 2 == 0 => (OK, vec![vec![OK], vec![OK]]),
        _ => (P, vec![vec![OK]]),
    };
    let steps = checks
        .into_iter()
        .enumerate()
        .map(|(j, snapshots)| {
            let name = if j == 0 { "Pipeline" } else { "Code review bot" };
            let mut step = Step::new(format!("sim-pr-{number}-check-{j}"), &id, name);
            step.state = snapshots[0];
            step.snapshots = snapshots;
            step.has_log = false;
            step.description = Some(format!("{name} for PR #{number}"));
            step.url = Some(format!("{SIM_WEB}/pull-requests/{number}"));
            step
        })
        .collect();
    let created_at = base - chrono::Duration::hours(i64::try_from(i).unwrap_or(0) * 5 + 1);
    SimRun {
        run: Run {
            id,
            kind: RunKind::PullRequest,
            number,
            title: TITLES[i].to_string(),
            state,
            created_at,
            completed_at: state.is_terminal().then_some(created_at),
            target: Target {
                branch: format!("pr/{number}"),
                commit: None,
            },
            duration_secs: None,
            author: ["Kim", "Dana", "Sam"][i % 3].to_string(),
            url: format!("{SIM_WEB}/pull-requests/{number}"),
        },
        steps,
    }
}
