use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Quit,
    DismissError,
    MoveUp,
    MoveDown,
    PageUp,
    PageDown,
    ScrollToTop,
    ScrollToBottom,
    Select,
    FocusNext,
    FocusPrev,
    SwitchFeed,
    Refresh,
    OpenBrowser,
    None,
}

/// Panel receiving navigation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    List,
    Steps,
    Log,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Self::List => Self::Steps,
            Self::Steps | Self::Log => Self::Log,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Self::Log => Self::Steps,
            Self::Steps | Self::List => Self::List,
        }
    }
}

/// Captures the UI state needed to interpret a key press.
#[derive(Debug, Clone, Default)]
pub struct InputContext {
    pub has_error: bool,
    pub is_loading: bool,
}

pub fn map_key(key: KeyEvent, ctx: &InputContext) -> Action {
    if key.kind != KeyEventKind::Press {
        return Action::None;
    }

    // Ctrl+C always quits
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }

    match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Esc => {
            if ctx.has_error {
                Action::DismissError
            } else {
                Action::Quit
            }
        }
        KeyCode::Up | KeyCode::Char('k') => Action::MoveUp,
        KeyCode::Down | KeyCode::Char('j') => Action::MoveDown,
        KeyCode::PageUp => Action::PageUp,
        KeyCode::PageDown => Action::PageDown,
        KeyCode::Char('g') | KeyCode::Home => Action::ScrollToTop,
        KeyCode::Char('G') | KeyCode::End => Action::ScrollToBottom,
        KeyCode::Enter => Action::Select,
        KeyCode::Right | KeyCode::Char('l') => Action::FocusNext,
        KeyCode::Left | KeyCode::Char('h') => Action::FocusPrev,
        KeyCode::Tab | KeyCode::BackTab => Action::SwitchFeed,
        KeyCode::Char('r') if !ctx.is_loading => Action::Refresh,
        KeyCode::Char('o') => Action::OpenBrowser,
        _ => Action::None,
    }
}
