//! Run → steps → step detail → command log.
//!
//! Selecting a run clears every panel downstream of it and fetches its steps; once
//! the steps arrive the first one is selected automatically, which fetches its
//! detail and then its log. Completions are applied in arrival order: with the
//! default [`crate::task::SupersedePolicy`] a slow fetch for an earlier selection
//! overwrites the panels and the recorded selection when it lands last. Under
//! `CancelPrevious` a new selection cancels every fetch downstream of it, so only
//! the newest selection ever writes.

use crate::app::{AppContext, AppState};
use crate::bus::BusEvent;
use crate::error::{Error, Result};
use crate::model::{Run, Step};
use crate::view::{Panels, ViewId, ViewTarget, Widget};

pub const NO_LOG_TEXT: &str = "No command log available for this step.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Steps,
    StepDetail,
    CommandLog,
}

impl Stage {
    fn view(self) -> ViewId {
        match self {
            Self::Steps => ViewId::Steps,
            Self::StepDetail => ViewId::StepDetail,
            Self::CommandLog => ViewId::CommandLog,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CascadeState {
    #[default]
    Idle,
    LoadingSteps,
    StepsReady,
    LoadingStepDetail,
    StepDetailReady,
    Error {
        stage: Stage,
        message: String,
    },
}

/// What is currently selected. Replaced wholesale, never patched field by field
/// from a background task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub run: Option<Run>,
    pub steps: Vec<Step>,
    pub step: Option<Step>,
}

/// `row` as an index into `len` items.
pub fn validate_row(row: isize, len: usize) -> Result<usize> {
    usize::try_from(row)
        .ok()
        .filter(|&i| i < len)
        .ok_or(Error::InvalidSelection { row, len })
}

#[derive(Debug, Default)]
pub struct SelectionCascade {
    state: CascadeState,
    selection: Selection,
}

impl SelectionCascade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_step_index(&self) -> Option<usize> {
        let step = self.selection.step.as_ref()?;
        self.selection.steps.iter().position(|s| s.id == step.id)
    }

    /// Select the run at `row` of `runs`. An out-of-range row is logged and
    /// otherwise ignored.
    pub fn select_run(
        &mut self,
        runs: &[Run],
        row: isize,
        panels: &mut Panels,
        ctx: &AppContext,
    ) -> bool {
        let idx = match validate_row(row, runs.len()) {
            Ok(idx) => idx,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring run selection");
                return false;
            }
        };
        let run = runs[idx].clone();
        tracing::debug!(run = %run.id, "run selected");

        cancel_pending(&ViewId::DEPENDENTS_OF_RUN, panels, ctx);
        panels.clear_all(&ViewId::DEPENDENTS_OF_RUN);
        self.selection = Selection {
            run: Some(run.clone()),
            steps: Vec::new(),
            step: None,
        };
        self.state = CascadeState::LoadingSteps;
        ctx.bus.publish(BusEvent::RunSelected {
            kind: run.kind,
            run_id: run.id.clone(),
            title: run.display_title(),
        });
        self.fetch_steps(run, None, panels, ctx);
        true
    }

    fn fetch_steps(&self, run: Run, keep_step: Option<String>, panels: &mut Panels, ctx: &AppContext) {
        let gateway = ctx.gateway.clone();
        let fetch_run = run.clone();
        ctx.runner.run(
            panels.get_mut(ViewId::Steps),
            async move { gateway.fetch_steps(&fetch_run).await },
            move |state: &mut AppState, ctx: &AppContext, result| {
                let AppState {
                    cascade, panels, ..
                } = state;
                cascade.on_steps(run, keep_step, result, panels, ctx);
            },
        );
    }

    /// Steps for `run` arrived. Selects `keep_step` if still present, else the first
    /// step.
    pub fn on_steps(
        &mut self,
        run: Run,
        keep_step: Option<String>,
        result: Result<Vec<Step>>,
        panels: &mut Panels,
        ctx: &AppContext,
    ) {
        let steps = match result {
            Ok(steps) => steps,
            Err(e) => {
                self.fail(Stage::Steps, &e, panels, ctx);
                return;
            }
        };
        let refreshing = keep_step.is_some();
        let selected = keep_step
            .and_then(|id| steps.iter().position(|s| s.id == id))
            .unwrap_or(0);

        ctx.bus.publish(BusEvent::StepsLoaded {
            run_id: run.id.clone(),
            count: steps.len(),
        });
        panels.get_mut(ViewId::Steps).display_widget(Widget::Steps {
            steps: steps.clone(),
            selected,
        });
        self.selection = Selection {
            run: Some(run),
            steps,
            step: None,
        };
        self.state = CascadeState::StepsReady;

        if !self.selection.steps.is_empty() {
            let row = isize::try_from(selected).unwrap_or(0);
            self.select_step_inner(row, !refreshing, panels, ctx);
        }
    }

    /// Select the step at `row` of the current run's steps.
    pub fn select_step(&mut self, row: isize, panels: &mut Panels, ctx: &AppContext) -> bool {
        self.select_step_inner(row, true, panels, ctx)
    }

    fn select_step_inner(
        &mut self,
        row: isize,
        clear: bool,
        panels: &mut Panels,
        ctx: &AppContext,
    ) -> bool {
        let idx = match validate_row(row, self.selection.steps.len()) {
            Ok(idx) => idx,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring step selection");
                return false;
            }
        };
        let Some(run) = self.selection.run.clone() else {
            return false;
        };
        let step = self.selection.steps[idx].clone();

        if clear {
            cancel_pending(&ViewId::DEPENDENTS_OF_STEP, panels, ctx);
            panels.clear_all(&ViewId::DEPENDENTS_OF_STEP);
        }
        if let Some((steps, _)) = panels.get(ViewId::Steps).steps() {
            let steps = steps.to_vec();
            panels
                .get_mut(ViewId::Steps)
                .display_widget(Widget::Steps { steps, selected: idx });
        }
        self.selection = Selection {
            run: Some(run.clone()),
            steps: self.selection.steps.clone(),
            step: Some(step.clone()),
        };
        self.state = CascadeState::LoadingStepDetail;
        ctx.bus.publish(BusEvent::StepSelected {
            run_id: run.id.clone(),
            step_id: step.id.clone(),
            name: step.name.clone(),
        });

        let gateway = ctx.gateway.clone();
        let step_id = step.id;
        ctx.runner.run(
            panels.get_mut(ViewId::StepDetail),
            async move {
                let detail = gateway.fetch_step_detail(&run, &step_id).await?;
                Ok((run, detail))
            },
            move |state: &mut AppState, ctx: &AppContext, result| {
                let AppState {
                    cascade, panels, ..
                } = state;
                cascade.on_step_detail(result, panels, ctx);
            },
        );
        true
    }

    pub fn on_step_detail(&mut self, result: Result<(Run, Step)>, panels: &mut Panels, ctx: &AppContext) {
        let (run, step) = match result {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(Stage::StepDetail, &e, panels, ctx);
                return;
            }
        };

        panels.get_mut(ViewId::StepDetail).display_widget(Widget::Detail {
            title: step.name.clone(),
            lines: step.detail_lines(),
        });
        let steps = if self.selection.run.as_ref().is_some_and(|r| r.id == run.id) {
            self.selection.steps.clone()
        } else {
            Vec::new()
        };
        self.selection = Selection {
            run: Some(run.clone()),
            steps,
            step: Some(step.clone()),
        };
        self.state = CascadeState::StepDetailReady;
        ctx.bus.publish(BusEvent::StepDetailLoaded {
            run_id: run.id.clone(),
            step_id: step.id.clone(),
        });

        if !step.has_log {
            panels
                .get_mut(ViewId::CommandLog)
                .display_text(NO_LOG_TEXT.to_string());
            return;
        }

        let gateway = ctx.gateway.clone();
        ctx.runner.run(
            panels.get_mut(ViewId::CommandLog),
            async move {
                let log = gateway.fetch_step_log(&run, &step.id).await?;
                Ok((run.id, step.id, log))
            },
            move |state: &mut AppState, ctx: &AppContext, result| {
                let AppState {
                    cascade, panels, ..
                } = state;
                cascade.on_command_log(result, panels, ctx);
            },
        );
    }

    pub fn on_command_log(
        &mut self,
        result: Result<(String, String, String)>,
        panels: &mut Panels,
        ctx: &AppContext,
    ) {
        match result {
            Ok((run_id, step_id, log)) => {
                let lines = log.lines().count();
                let text = if log.trim().is_empty() {
                    "(empty log)".to_string()
                } else {
                    log
                };
                panels.get_mut(ViewId::CommandLog).display_text(text);
                ctx.bus.publish(BusEvent::CommandLogLoaded {
                    run_id,
                    step_id,
                    lines,
                });
            }
            Err(e) => self.fail(Stage::CommandLog, &e, panels, ctx),
        }
    }

    /// Re-fetch the selected run's steps without clearing anything, keeping the
    /// selected step. Skipped while the cascade is already loading.
    pub fn refresh(&mut self, panels: &mut Panels, ctx: &AppContext) -> bool {
        if matches!(
            self.state,
            CascadeState::Idle | CascadeState::LoadingSteps | CascadeState::LoadingStepDetail
        ) {
            return false;
        }
        let Some(run) = self.selection.run.clone() else {
            return false;
        };
        let keep = self.selection.step.as_ref().map(|s| s.id.clone());
        self.state = CascadeState::LoadingSteps;
        self.fetch_steps(run, keep, panels, ctx);
        true
    }

    /// Forget the selection and empty the dependent panels.
    pub fn reset(&mut self, panels: &mut Panels) {
        panels.clear_all(&ViewId::DEPENDENTS_OF_RUN);
        self.selection = Selection::default();
        self.state = CascadeState::Idle;
    }

    fn fail(&mut self, stage: Stage, err: &Error, panels: &mut Panels, ctx: &AppContext) {
        let view = stage.view();
        panels.get_mut(view).display_error(err);
        self.state = CascadeState::Error {
            stage,
            message: err.panel_message(),
        };
        ctx.bus.publish(BusEvent::FetchFailed {
            view,
            message: err.panel_message(),
        });
    }
}

/// Cancel the outstanding fetches for `views`, if the runner cancels at all.
fn cancel_pending(views: &[ViewId], panels: &mut Panels, ctx: &AppContext) {
    for &view in views {
        if ctx.runner.cancel(view) {
            panels.get_mut(view).clear_busy();
        }
    }
}
