//! Feed data model: runs (pipelines and pull requests), their steps, and one page of
//! a feed.

use crate::pagination::Pagination;
use crate::status::StepState;
use chrono::{DateTime, Utc};

// ── Shared utility functions ──

/// Format a duration in seconds into a human-readable string (e.g. "2m 5s").
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Compute a human-readable duration from optional start/end timestamps.
/// Returns an empty string if no start time is available.
pub fn compute_duration(
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> String {
    match (started_at, completed_at) {
        (Some(start), Some(end)) => format_duration(end.signed_duration_since(start).num_seconds()),
        (Some(start), None) => {
            format_duration(Utc::now().signed_duration_since(start).num_seconds())
        }
        _ => String::new(),
    }
}

/// Unicode-width-aware truncation with ellipsis.
/// Returns `""` when `max_width` is 0.
pub fn truncate(s: &str, max_width: usize) -> String {
    use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(s) <= max_width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for c in s.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            out.push('\u{2026}');
            break;
        }
        out.push(c);
        width += cw;
    }
    out
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    Pipeline,
    PullRequest,
}

/// What a run was built from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub branch: String,
    pub commit: Option<String>,
}

impl Target {
    pub fn short_commit(&self) -> Option<&str> {
        self.commit.as_deref().map(|c| c.get(..7).unwrap_or(c))
    }
}

/// A pipeline or a pull request, as listed in a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Pipeline UUID or pull-request id; opaque to everything but the gateway.
    pub id: String,
    pub kind: RunKind,
    /// Build number for pipelines, pull-request number for pull requests.
    pub number: u64,
    pub title: String,
    pub state: StepState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub target: Target,
    pub duration_secs: Option<u64>,
    pub author: String,
    pub url: String,
}

impl Run {
    pub fn display_title(&self) -> String {
        match self.kind {
            RunKind::Pipeline => format!("#{} {}", self.number, self.title),
            RunKind::PullRequest => format!("PR #{} {}", self.number, self.title),
        }
    }

    /// Elapsed build time: the reported duration when finished, wall time otherwise.
    pub fn duration_label(&self) -> String {
        match self.duration_secs {
            Some(secs) if self.completed_at.is_some() => {
                format_duration(i64::try_from(secs).unwrap_or(i64::MAX))
            }
            _ => compute_duration(Some(self.created_at), self.completed_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub name: String,
    pub command: String,
}

/// One step of a run. Listing endpoints fill the summary fields; the detail
/// endpoint also fills `commands` and `image`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub run_id: String,
    pub name: String,
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Observed-state timeline replayed by the simulation; empty for live data.
    pub snapshots: Vec<StepState>,
    pub commands: Vec<StepCommand>,
    pub image: Option<String>,
    /// `false` for pull-request checks, which are reported by external systems.
    pub has_log: bool,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, run_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            name: name.into(),
            state: StepState::PENDING,
            started_at: None,
            completed_at: None,
            snapshots: Vec::new(),
            commands: Vec::new(),
            image: None,
            has_log: true,
            description: None,
            url: None,
        }
    }

    /// Key/value rows for the step-detail panel.
    pub fn detail_lines(&self) -> Vec<(String, String)> {
        let mut lines = vec![
            ("Name".to_string(), self.name.clone()),
            ("Status".to_string(), self.state.label().to_string()),
        ];
        if let Some(image) = &self.image {
            lines.push(("Image".to_string(), image.clone()));
        }
        if let Some(started) = self.started_at {
            lines.push(("Started".to_string(), timestamp(started)));
        }
        if let Some(completed) = self.completed_at {
            lines.push(("Completed".to_string(), timestamp(completed)));
        }
        let dur = compute_duration(self.started_at, self.completed_at);
        if !dur.is_empty() {
            let label = if self.completed_at.is_none() {
                format!("{dur} (running)")
            } else {
                dur
            };
            lines.push(("Duration".to_string(), label));
        }
        if let Some(description) = &self.description {
            lines.push(("Description".to_string(), description.clone()));
        }
        for (i, cmd) in self.commands.iter().enumerate() {
            let key = if i == 0 { "Commands" } else { "" };
            lines.push((key.to_string(), format!("$ {}", cmd.command)));
        }
        if let Some(url) = &self.url {
            lines.push(("URL".to_string(), url.clone()));
        }
        lines
    }
}

/// One page of a feed as returned by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub runs: Vec<Run>,
    pub pagination: Pagination,
}
