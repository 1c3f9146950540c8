//! Bitbucket Cloud 2.0 response decoding.
//!
//! Every listing endpoint wraps its values in the same paged envelope. Pages are
//! 1-based on the wire and 0-based in [`Pagination`].

use crate::error::{Error, Result};
use crate::model::{Page, Run, RunKind, Step, StepCommand, Target};
use crate::pagination::Pagination;
use crate::status::{RunResult, Status, StepState};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Deserialize)]
struct Paged<T> {
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    pagelen: Option<usize>,
    #[serde(default)]
    next: Option<String>,
    values: Vec<T>,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct ApiState {
    name: String,
    #[serde(default)]
    result: Option<Named>,
}

#[derive(Deserialize)]
struct ApiCommit {
    hash: String,
}

#[derive(Deserialize)]
struct ApiBranch {
    name: String,
}

#[derive(Deserialize)]
struct ApiAccount {
    display_name: String,
}

#[derive(Deserialize)]
struct ApiEndpoint {
    #[serde(default)]
    branch: Option<ApiBranch>,
    #[serde(default)]
    commit: Option<ApiCommit>,
}

#[derive(Deserialize)]
struct ApiTarget {
    #[serde(default)]
    ref_name: Option<String>,
    #[serde(default)]
    commit: Option<ApiCommit>,
    /// Pull-request pipelines carry a source branch instead of a ref.
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize)]
struct ApiPipeline {
    uuid: String,
    build_number: u64,
    state: ApiState,
    created_on: DateTime<Utc>,
    #[serde(default)]
    completed_on: Option<DateTime<Utc>>,
    target: ApiTarget,
    #[serde(default)]
    duration_in_seconds: Option<u64>,
    #[serde(default)]
    creator: Option<ApiAccount>,
    #[serde(default)]
    trigger: Option<Named>,
}

#[derive(Deserialize)]
struct ApiStep {
    uuid: String,
    #[serde(default)]
    name: Option<String>,
    state: ApiState,
    #[serde(default)]
    started_on: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_on: Option<DateTime<Utc>>,
    #[serde(default)]
    image: Option<Named>,
    #[serde(default)]
    script_commands: Vec<ApiCommand>,
}

#[derive(Deserialize)]
struct ApiCommand {
    name: String,
    command: String,
}

#[derive(Deserialize)]
struct ApiHref {
    href: String,
}

#[derive(Deserialize)]
struct ApiLinks {
    #[serde(default)]
    html: Option<ApiHref>,
}

#[derive(Deserialize)]
struct ApiPullRequest {
    id: u64,
    title: String,
    state: String,
    #[serde(default)]
    author: Option<ApiAccount>,
    source: ApiEndpoint,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
    #[serde(default)]
    links: Option<ApiLinks>,
}

#[derive(Deserialize)]
struct ApiCommitStatus {
    key: String,
    #[serde(default)]
    name: Option<String>,
    state: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(Error::unparseable)
}

fn pagination<T>(paged: &Paged<T>) -> Pagination {
    let page_len = paged.pagelen.unwrap_or(paged.values.len());
    let page = paged.page.unwrap_or(1).saturating_sub(1);
    let size = paged
        .size
        .unwrap_or(page * page_len + paged.values.len());
    Pagination::new(size, page_len, page, paged.next.clone())
}

/// Pipeline and step states: `PENDING`, `IN_PROGRESS` or `COMPLETED` with a result.
fn pipeline_state(state: &ApiState) -> StepState {
    match state.name.as_str() {
        "PENDING" => StepState::PENDING,
        "IN_PROGRESS" | "RUNNING" => StepState::IN_PROGRESS,
        "COMPLETED" => match state.result.as_ref().map(|r| r.name.as_str()) {
            Some("SUCCESSFUL") => StepState::PASSED,
            Some("FAILED") => StepState::FAILED,
            Some("ERROR") => StepState::new(Status::Failed, Some(RunResult::Error)),
            Some("STOPPED") => StepState::new(Status::Unknown, Some(RunResult::Stopped)),
            _ => StepState::UNKNOWN,
        },
        _ => StepState::UNKNOWN,
    }
}

fn commit_status_state(state: &str) -> StepState {
    match state {
        "SUCCESSFUL" => StepState::PASSED,
        "FAILED" => StepState::FAILED,
        "INPROGRESS" => StepState::IN_PROGRESS,
        "STOPPED" => StepState::new(Status::Unknown, Some(RunResult::Stopped)),
        _ => StepState::UNKNOWN,
    }
}

fn pull_request_state(state: &str) -> StepState {
    match state {
        "OPEN" => StepState::PENDING,
        "MERGED" => StepState::PASSED,
        "DECLINED" | "SUPERSEDED" => StepState::new(Status::Unknown, Some(RunResult::Stopped)),
        _ => StepState::UNKNOWN,
    }
}

/// `web_base` is the repository's browser URL, e.g. `https://bitbucket.org/ws/repo`.
pub fn parse_pipelines_page(json: &str, web_base: &str) -> Result<Page> {
    let paged: Paged<ApiPipeline> = decode(json)?;
    let pagination = pagination(&paged);
    let runs = paged
        .values
        .into_iter()
        .map(|p| {
            let branch = p
                .target
                .ref_name
                .or(p.target.source)
                .unwrap_or_else(|| "(detached)".to_string());
            let title = match p.trigger.map(|t| t.name.to_lowercase()) {
                Some(trigger) if trigger != "push" => format!("{branch} ({trigger})"),
                _ => branch.clone(),
            };
            Run {
                id: p.uuid,
                kind: RunKind::Pipeline,
                number: p.build_number,
                title,
                state: pipeline_state(&p.state),
                created_at: p.created_on,
                completed_at: p.completed_on,
                target: Target {
                    branch,
                    commit: p.target.commit.map(|c| c.hash),
                },
                duration_secs: p.duration_in_seconds,
                author: p.creator.map(|a| a.display_name).unwrap_or_default(),
                url: format!("{web_base}/pipelines/results/{}", p.build_number),
            }
        })
        .collect();
    Ok(Page { runs, pagination })
}

pub fn parse_pull_requests_page(json: &str) -> Result<Page> {
    let paged: Paged<ApiPullRequest> = decode(json)?;
    let pagination = pagination(&paged);
    let runs = paged
        .values
        .into_iter()
        .map(|pr| {
            let state = pull_request_state(&pr.state);
            Run {
                id: pr.id.to_string(),
                kind: RunKind::PullRequest,
                number: pr.id,
                title: pr.title,
                state,
                created_at: pr.created_on,
                completed_at: state.is_terminal().then_some(pr.updated_on),
                target: Target {
                    branch: pr.source.branch.map(|b| b.name).unwrap_or_default(),
                    commit: pr.source.commit.map(|c| c.hash),
                },
                duration_secs: None,
                author: pr.author.map(|a| a.display_name).unwrap_or_default(),
                url: pr
                    .links
                    .and_then(|l| l.html)
                    .map(|h| h.href)
                    .unwrap_or_default(),
            }
        })
        .collect();
    Ok(Page { runs, pagination })
}

fn step_from_api(api: ApiStep, run_id: &str) -> Step {
    let mut step = Step::new(
        api.uuid,
        run_id,
        api.name.unwrap_or_else(|| "(unnamed step)".to_string()),
    );
    step.state = pipeline_state(&api.state);
    step.started_at = api.started_on;
    step.completed_at = api.completed_on;
    step.image = api.image.map(|i| i.name);
    step.commands = api
        .script_commands
        .into_iter()
        .map(|c| StepCommand {
            name: c.name,
            command: c.command,
        })
        .collect();
    step
}

pub fn parse_steps(json: &str, run_id: &str) -> Result<Vec<Step>> {
    let paged: Paged<ApiStep> = decode(json)?;
    Ok(paged
        .values
        .into_iter()
        .map(|s| step_from_api(s, run_id))
        .collect())
}

pub fn parse_step(json: &str, run_id: &str) -> Result<Step> {
    let api: ApiStep = decode(json)?;
    Ok(step_from_api(api, run_id))
}

/// Build statuses reported against a pull request's head commit, as steps. They
/// come from external systems and have no log.
pub fn parse_commit_statuses(json: &str, run_id: &str) -> Result<Vec<Step>> {
    let paged: Paged<ApiCommitStatus> = decode(json)?;
    Ok(paged
        .values
        .into_iter()
        .map(|s| {
            let name = s.name.unwrap_or_else(|| s.key.clone());
            let state = commit_status_state(&s.state);
            let mut step = Step::new(s.key, run_id, name);
            step.state = state;
            step.started_at = Some(s.created_on);
            step.completed_at = state.is_terminal().then_some(s.updated_on);
            step.has_log = false;
            step.description = s.description.filter(|d| !d.is_empty());
            step.url = s.url;
            step
        })
        .collect())
}

/// The `error.message` of a Bitbucket error body, if it is one.
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiError>(body)
        .ok()
        .map(|e| e.error.message)
}

/// Takes the last `max_lines` lines from raw log output.
/// Returns `(text, was_truncated)`.
pub fn process_log_output(raw: &str, max_lines: usize) -> (String, bool) {
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() > max_lines {
        let truncated = &lines[lines.len() - max_lines..];
        (truncated.join("\n"), true)
    } else {
        (raw.to_string(), false)
    }
}
