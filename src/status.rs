//! Status derivation: aggregate run status from step states, and the clock-driven
//! simulation that replays a canned state timeline per observed step.
//!
//! Priority for aggregation is `Failed > InProgress > Pending > Passed > Unknown`.
//! The simulation never sleeps: the poll count is computed from the elapsed time
//! between an identifier's first observation and "now", both supplied by an
//! injected [`Clock`], so identical inputs always produce identical states.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Failed,
    InProgress,
    Pending,
    Passed,
    Unknown,
}

/// Outcome of a finished run or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunResult {
    Successful,
    Failed,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepState {
    pub status: Status,
    pub result: Option<RunResult>,
}

impl StepState {
    pub const PENDING: Self = Self::new(Status::Pending, None);
    pub const IN_PROGRESS: Self = Self::new(Status::InProgress, None);
    pub const PASSED: Self = Self::new(Status::Passed, Some(RunResult::Successful));
    pub const FAILED: Self = Self::new(Status::Failed, Some(RunResult::Failed));
    pub const UNKNOWN: Self = Self::new(Status::Unknown, None);

    pub const fn new(status: Status, result: Option<RunResult>) -> Self {
        Self { status, result }
    }

    pub fn is_failed(self) -> bool {
        self.status == Status::Failed || self.result == Some(RunResult::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self.status, Status::InProgress | Status::Pending)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self.status, Status::Passed | Status::Failed) || self.result.is_some()
    }

    pub fn class(self) -> StatusClass {
        StatusClass::of(self)
    }

    /// Short human label, e.g. `"passed"` or `"stopped"`.
    pub fn label(self) -> &'static str {
        match (self.status, self.result) {
            (_, Some(RunResult::Stopped)) => "stopped",
            (_, Some(RunResult::Error)) => "error",
            (Status::Failed, _) | (_, Some(RunResult::Failed)) => "failed",
            (Status::InProgress, _) => "running",
            (Status::Pending, _) => "pending",
            (Status::Passed, _) => "passed",
            (Status::Unknown, _) => "unknown",
        }
    }
}

/// Reduce a collection of step states into the state of the run that owns them.
///
/// Commutative over the input: only the set of states present matters. An empty
/// input is `Pending` (nothing has reported yet).
pub fn derive_aggregate_status<'a, I>(sub_states: I) -> StepState
where
    I: IntoIterator<Item = &'a StepState>,
{
    let mut any = false;
    let mut all_passed = true;
    let mut running = false;

    for state in sub_states {
        if state.is_failed() {
            return StepState::FAILED;
        }
        any = true;
        running |= state.status == Status::InProgress;
        all_passed &= state.status == Status::Passed;
    }

    if running {
        StepState::IN_PROGRESS
    } else if any && all_passed {
        StepState::PASSED
    } else {
        StepState::PENDING
    }
}

/// Display class the renderer maps to an icon and a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Failure,
    Stopped,
    Running,
    Waiting,
    Neutral,
}

impl StatusClass {
    pub fn of(state: StepState) -> Self {
        match (state.status, state.result) {
            (_, Some(RunResult::Stopped)) => Self::Stopped,
            (_, Some(RunResult::Failed | RunResult::Error)) | (Status::Failed, _) => {
                Self::Failure
            }
            (Status::InProgress, _) => Self::Running,
            (Status::Pending, _) => Self::Waiting,
            (Status::Passed, _) | (_, Some(RunResult::Successful)) => Self::Success,
            (Status::Unknown, None) => Self::Neutral,
        }
    }
}

// ── Simulation clock ──

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Number of whole poll intervals between `first_observed` and `now`.
/// Time running backwards counts as zero polls; a zero interval is treated as 1ms.
pub fn poll_count_since(
    first_observed: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: Duration,
) -> u64 {
    let elapsed_ms = now.signed_duration_since(first_observed).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }
    let interval_ms = (interval.as_millis() as u64).max(1);
    elapsed_ms as u64 / interval_ms
}

/// The snapshot visible after `poll_count_since(first_observed, now)` polls, clamped to
/// the last snapshot. `None` only when there are no snapshots at all.
pub fn simulated_state_at(
    snapshots: &[StepState],
    first_observed: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Option<StepState> {
    let last = snapshots.len().checked_sub(1)?;
    let polls = poll_count_since(first_observed, now, interval);
    let idx = usize::try_from(polls).unwrap_or(usize::MAX).min(last);
    Some(snapshots[idx])
}

/// First-observation timestamps per identifier, owned by whoever simulates.
pub struct PollClock {
    clock: Arc<dyn Clock>,
    interval: Duration,
    first_seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PollClock {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            first_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the first-observed time for `id`, seeding it with "now" if unseen.
    /// The check and the insert happen under one lock so two concurrent first
    /// observations agree on a single timestamp.
    pub fn observe(&self, id: &str) -> DateTime<Utc> {
        let mut seen = self
            .first_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *seen
            .entry(id.to_string())
            .or_insert_with(|| self.clock.now())
    }

    pub fn poll_count(&self, id: &str) -> u64 {
        let first = self.observe(id);
        poll_count_since(first, self.clock.now(), self.interval)
    }

    /// Current simulated state of `id`; unknown for an empty timeline.
    pub fn state_of(&self, id: &str, snapshots: &[StepState]) -> StepState {
        let first = self.observe(id);
        simulated_state_at(snapshots, first, self.clock.now(), self.interval)
            .unwrap_or(StepState::UNKNOWN)
    }

    pub fn reset(&self) {
        self.first_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    /// Every ordering of `states`, for commutativity checks.
    fn permutations(states: &[StepState]) -> Vec<Vec<StepState>> {
        if states.len() <= 1 {
            return vec![states.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..states.len() {
            let mut rest = states.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn failed_wins_in_every_order() {
        let states = [
            StepState::PASSED,
            StepState::IN_PROGRESS,
            StepState::FAILED,
            StepState::PENDING,
        ];
        for order in permutations(&states) {
            assert_eq!(derive_aggregate_status(&order), StepState::FAILED, "{order:?}");
        }
    }

    #[test]
    fn failed_result_field_counts_as_failed() {
        let odd = StepState::new(Status::Passed, Some(RunResult::Failed));
        assert_eq!(
            derive_aggregate_status(&[StepState::PASSED, odd]),
            StepState::FAILED
        );
    }

    #[test]
    fn in_progress_without_failure() {
        let states = [StepState::PASSED, StepState::PENDING, StepState::IN_PROGRESS];
        for order in permutations(&states) {
            let agg = derive_aggregate_status(&order);
            assert_eq!(agg.status, Status::InProgress);
            assert_eq!(agg.result, None);
        }
    }

    #[test]
    fn all_passed_is_successful() {
        let agg = derive_aggregate_status(&[StepState::PASSED, StepState::PASSED]);
        assert_eq!(agg.status, Status::Passed);
        assert_eq!(agg.result, Some(RunResult::Successful));
    }

    #[test]
    fn empty_is_pending() {
        assert_eq!(derive_aggregate_status(&[]), StepState::PENDING);
    }

    #[test]
    fn mixed_passed_and_pending_is_pending() {
        let agg = derive_aggregate_status(&[StepState::PASSED, StepState::PENDING]);
        assert_eq!(agg, StepState::PENDING);
    }

    #[test]
    fn unknown_only_is_pending() {
        assert_eq!(
            derive_aggregate_status(&[StepState::UNKNOWN]),
            StepState::PENDING
        );
    }

    #[test]
    fn twelve_seconds_at_five_second_polls() {
        let snapshots = [StepState::PENDING, StepState::IN_PROGRESS, StepState::PASSED];
        let now = t0() + chrono::Duration::seconds(12);
        let interval = Duration::from_secs(5);
        assert_eq!(poll_count_since(t0(), now, interval), 2);
        assert_eq!(
            simulated_state_at(&snapshots, t0(), now, interval),
            Some(StepState::PASSED)
        );
    }

    #[test]
    fn simulation_is_monotonic_and_clamped() {
        let snapshots = [StepState::PENDING, StepState::IN_PROGRESS, StepState::PASSED];
        let interval = Duration::from_secs(5);
        let mut last_idx = 0;
        for secs in 0..120 {
            let now = t0() + chrono::Duration::seconds(secs);
            let state = simulated_state_at(&snapshots, t0(), now, interval).unwrap();
            let idx = snapshots.iter().position(|s| *s == state).unwrap();
            assert!(idx >= last_idx, "went backwards at {secs}s");
            last_idx = idx;
        }
        assert_eq!(last_idx, snapshots.len() - 1);
    }

    #[test]
    fn simulation_is_deterministic() {
        let snapshots = [StepState::PENDING, StepState::IN_PROGRESS, StepState::FAILED];
        let now = t0() + chrono::Duration::seconds(7);
        let interval = Duration::from_secs(5);
        let a = simulated_state_at(&snapshots, t0(), now, interval);
        let b = simulated_state_at(&snapshots, t0(), now, interval);
        assert_eq!(a, b);
        assert_eq!(a, Some(StepState::IN_PROGRESS));
    }

    #[test]
    fn clock_going_backwards_is_first_snapshot() {
        let snapshots = [StepState::PENDING, StepState::PASSED];
        let before = t0() - chrono::Duration::seconds(30);
        assert_eq!(
            simulated_state_at(&snapshots, t0(), before, Duration::from_secs(5)),
            Some(StepState::PENDING)
        );
    }

    #[test]
    fn empty_timeline_has_no_state() {
        assert_eq!(
            simulated_state_at(&[], t0(), t0(), Duration::from_secs(5)),
            None
        );
    }

    #[test]
    fn poll_clock_seeds_once() {
        let clock = Arc::new(ManualClock::new(t0()));
        let polls = PollClock::new(clock.clone(), Duration::from_secs(5));
        let first = polls.observe("step-a");
        clock.advance(Duration::from_secs(11));
        assert_eq!(polls.observe("step-a"), first);
        assert_eq!(polls.poll_count("step-a"), 2);
        // A newly seen id starts from zero.
        assert_eq!(polls.poll_count("step-b"), 0);
    }

    #[test]
    fn poll_clock_reset_forgets_ids() {
        let clock = Arc::new(ManualClock::new(t0()));
        let polls = PollClock::new(clock.clone(), Duration::from_secs(5));
        polls.observe("step-a");
        clock.advance(Duration::from_secs(20));
        assert_eq!(polls.poll_count("step-a"), 4);
        polls.reset();
        assert_eq!(polls.poll_count("step-a"), 0);
    }

    #[test]
    fn poll_clock_concurrent_first_observation_agrees() {
        let clock = Arc::new(ManualClock::new(t0()));
        let polls = Arc::new(PollClock::new(clock, Duration::from_secs(5)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let polls = polls.clone();
                std::thread::spawn(move || polls.observe("shared"))
            })
            .collect();
        let seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(seen.iter().all(|t| *t == seen[0]));
    }

    #[test]
    fn classes() {
        assert_eq!(StepState::PASSED.class(), StatusClass::Success);
        assert_eq!(StepState::FAILED.class(), StatusClass::Failure);
        assert_eq!(StepState::IN_PROGRESS.class(), StatusClass::Running);
        assert_eq!(StepState::PENDING.class(), StatusClass::Waiting);
        assert_eq!(
            StepState::new(Status::Passed, Some(RunResult::Stopped)).class(),
            StatusClass::Stopped
        );
        assert_eq!(StepState::UNKNOWN.class(), StatusClass::Neutral);
    }
}
