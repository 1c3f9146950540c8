use crate::model::Run;
use crate::status::StatusClass;

/// Runs that were active in `before` and are terminal in `after`. Runs seen for the
/// first time never count: the first refresh after start-up is silent.
pub fn detect_transitions(before: &[Run], after: &[Run]) -> Vec<Run> {
    after
        .iter()
        .filter(|run| run.state.is_terminal())
        .filter(|run| {
            before
                .iter()
                .find(|old| old.id == run.id)
                .is_some_and(|old| old.state.is_active())
        })
        .cloned()
        .collect()
}

/// One-line summary used for the in-app notification.
pub fn transition_message(run: &Run) -> String {
    let title = run.display_title();
    match run.state.class() {
        StatusClass::Success => format!("{title} completed successfully"),
        StatusClass::Failure => format!("{title} failed"),
        StatusClass::Stopped => format!("{title} was stopped"),
        _ => format!("{title} finished ({})", run.state.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunKind, Target};
    use crate::status::{RunResult, Status, StepState};
    use chrono::Utc;

    fn make_run(id: u64, state: StepState) -> Run {
        Run {
            id: id.to_string(),
            kind: RunKind::Pipeline,
            number: id,
            title: format!("Run {id}"),
            state,
            created_at: Utc::now(),
            completed_at: None,
            target: Target::default(),
            duration_secs: None,
            author: String::new(),
            url: String::new(),
        }
    }

    #[test]
    fn first_observation_is_silent() {
        let after = vec![make_run(1, StepState::PASSED)];
        assert!(detect_transitions(&[], &after).is_empty());
    }

    #[test]
    fn no_change_no_transition() {
        let runs = vec![make_run(1, StepState::IN_PROGRESS)];
        assert!(detect_transitions(&runs, &runs).is_empty());
    }

    #[test]
    fn in_progress_to_passed() {
        let before = vec![make_run(1, StepState::IN_PROGRESS)];
        let after = vec![make_run(1, StepState::PASSED)];
        let finished = detect_transitions(&before, &after);
        assert_eq!(finished.len(), 1);
        assert_eq!(
            transition_message(&finished[0]),
            "#1 Run 1 completed successfully"
        );
    }

    #[test]
    fn pending_to_failed() {
        let before = vec![make_run(2, StepState::PENDING)];
        let after = vec![make_run(2, StepState::FAILED)];
        let finished = detect_transitions(&before, &after);
        assert!(transition_message(&finished[0]).ends_with("failed"));
    }

    #[test]
    fn already_terminal_is_not_reported_again() {
        let before = vec![make_run(3, StepState::FAILED)];
        let after = vec![make_run(3, StepState::PASSED)];
        assert!(detect_transitions(&before, &after).is_empty());
    }

    #[test]
    fn stopped_message() {
        let run = make_run(4, StepState::new(Status::Unknown, Some(RunResult::Stopped)));
        let before = vec![make_run(4, StepState::IN_PROGRESS)];
        let finished = detect_transitions(&before, std::slice::from_ref(&run));
        assert_eq!(transition_message(&finished[0]), "#4 Run 4 was stopped");
    }

    #[test]
    fn only_matching_ids() {
        let before = vec![
            make_run(1, StepState::IN_PROGRESS),
            make_run(2, StepState::IN_PROGRESS),
        ];
        let after = vec![
            make_run(1, StepState::IN_PROGRESS),
            make_run(2, StepState::PASSED),
            make_run(3, StepState::PASSED),
        ];
        let finished = detect_transitions(&before, &after);
        assert_eq!(finished.iter().map(|r| r.number).collect::<Vec<_>>(), vec![2]);
    }
}
