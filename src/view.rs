//! View targets: what the orchestration core is allowed to do to a panel.
//!
//! Panels are owned by [`crate::app::AppState`] and only touched from the UI task.
//! Background work never holds a panel; it names one by [`ViewId`] and the UI task
//! applies the update when the message arrives.

use crate::model::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewId {
    Pipelines,
    PullRequests,
    Steps,
    StepDetail,
    CommandLog,
}

impl ViewId {
    /// Panels downstream of a run selection, in cascade order.
    pub const DEPENDENTS_OF_RUN: [ViewId; 3] =
        [ViewId::Steps, ViewId::StepDetail, ViewId::CommandLog];
    /// Panels downstream of a step selection.
    pub const DEPENDENTS_OF_STEP: [ViewId; 2] = [ViewId::StepDetail, ViewId::CommandLog];

    pub fn title(self) -> &'static str {
        match self {
            Self::Pipelines => "Pipelines",
            Self::PullRequests => "Pull requests",
            Self::Steps => "Steps",
            Self::StepDetail => "Step",
            Self::CommandLog => "Log",
        }
    }
}

/// Structured content a panel can show.
#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    Steps { steps: Vec<Step>, selected: usize },
    Detail { title: String, lines: Vec<(String, String)> },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PanelContent {
    #[default]
    Empty,
    Text(String),
    Widget(Widget),
    Error(String),
}

/// Capability interface for anything the core can render into.
pub trait ViewTarget {
    fn id(&self) -> ViewId;
    fn display_text(&mut self, text: String);
    fn display_widget(&mut self, widget: Widget);
    fn clear(&mut self);
    fn display_busy(&mut self, frame: usize);
    fn clear_busy(&mut self);

    fn display_error(&mut self, err: &crate::error::Error) {
        self.display_text(err.panel_message());
    }
}

#[derive(Debug, Clone)]
pub struct Panel {
    id: ViewId,
    pub content: PanelContent,
    /// Spinner frame while a fetch bound to this panel is outstanding.
    pub busy: Option<usize>,
    pub scroll: usize,
}

impl Panel {
    pub fn new(id: ViewId) -> Self {
        Self {
            id,
            content: PanelContent::Empty,
            busy: None,
            scroll: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.content == PanelContent::Empty
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            PanelContent::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.content {
            PanelContent::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn steps(&self) -> Option<(&[Step], usize)> {
        match &self.content {
            PanelContent::Widget(Widget::Steps { steps, selected }) => Some((steps, *selected)),
            _ => None,
        }
    }

    pub fn line_count(&self) -> usize {
        match &self.content {
            PanelContent::Text(t) => t.lines().count(),
            _ => 0,
        }
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.scroll = self.scroll.saturating_sub(amount);
    }

    pub fn scroll_down(&mut self, amount: usize, visible_height: usize) {
        let max_scroll = self.line_count().saturating_sub(visible_height);
        self.scroll = (self.scroll + amount).min(max_scroll);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self, visible_height: usize) {
        self.scroll = self.line_count().saturating_sub(visible_height);
    }
}

impl ViewTarget for Panel {
    fn id(&self) -> ViewId {
        self.id
    }

    fn display_text(&mut self, text: String) {
        self.content = PanelContent::Text(text);
        self.scroll = 0;
    }

    fn display_widget(&mut self, widget: Widget) {
        self.content = PanelContent::Widget(widget);
    }

    fn clear(&mut self) {
        self.content = PanelContent::Empty;
        self.scroll = 0;
    }

    fn display_busy(&mut self, frame: usize) {
        self.busy = Some(frame);
    }

    fn clear_busy(&mut self) {
        self.busy = None;
    }

    fn display_error(&mut self, err: &crate::error::Error) {
        self.content = PanelContent::Error(err.panel_message());
        self.scroll = 0;
    }
}

/// Every panel of the dashboard, addressable by id.
#[derive(Debug, Clone)]
pub struct Panels {
    pipelines: Panel,
    pull_requests: Panel,
    steps: Panel,
    step_detail: Panel,
    command_log: Panel,
}

impl Default for Panels {
    fn default() -> Self {
        Self {
            pipelines: Panel::new(ViewId::Pipelines),
            pull_requests: Panel::new(ViewId::PullRequests),
            steps: Panel::new(ViewId::Steps),
            step_detail: Panel::new(ViewId::StepDetail),
            command_log: Panel::new(ViewId::CommandLog),
        }
    }
}

impl Panels {
    pub fn get(&self, id: ViewId) -> &Panel {
        match id {
            ViewId::Pipelines => &self.pipelines,
            ViewId::PullRequests => &self.pull_requests,
            ViewId::Steps => &self.steps,
            ViewId::StepDetail => &self.step_detail,
            ViewId::CommandLog => &self.command_log,
        }
    }

    pub fn get_mut(&mut self, id: ViewId) -> &mut Panel {
        match id {
            ViewId::Pipelines => &mut self.pipelines,
            ViewId::PullRequests => &mut self.pull_requests,
            ViewId::Steps => &mut self.steps,
            ViewId::StepDetail => &mut self.step_detail,
            ViewId::CommandLog => &mut self.command_log,
        }
    }

    pub fn clear_all(&mut self, ids: &[ViewId]) {
        for id in ids {
            self.get_mut(*id).clear();
        }
    }
}
