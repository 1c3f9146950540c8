use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::app::AppState;
use crate::input::Focus;

pub fn render(f: &mut Frame, area: Rect, state: &AppState) {
    let narrow = area.width < crate::app::NARROW_WIDTH_THRESHOLD;

    let hints: &[(&str, &str)] = match (state.focus, narrow) {
        (Focus::Log, _) => &[
            ("j/k", "scroll"),
            ("g/G", "top/bottom"),
            ("h", "back"),
            ("o", "open"),
            ("q", "quit"),
        ],
        (_, true) => &[
            ("j/k", "nav"),
            ("⏎", "sel"),
            ("l/h", "panel"),
            ("tab", "feed"),
            ("r", "refresh"),
            ("q", "quit"),
        ],
        (Focus::Steps, false) => &[
            ("↑↓/jk", "step"),
            ("→/l", "log"),
            ("←/h", "list"),
            ("o", "open"),
            ("r", "refresh"),
            ("q", "quit"),
        ],
        (Focus::List, false) => &[
            ("↑↓/jk", "navigate"),
            ("Enter", "select"),
            ("→/l", "steps"),
            ("Tab", "pipelines/PRs"),
            ("o", "open"),
            ("r", "refresh"),
            ("q", "quit"),
        ],
    };

    let line = if let Some(notif) = state.notifications.last() {
        Line::from(vec![
            Span::styled("★ ", Style::default().fg(Color::Yellow)),
            Span::styled(&notif.message, Style::default().fg(Color::Yellow)),
        ])
    } else {
        let mut spans: Vec<Span> = Vec::new();
        for (i, (key, desc)) in hints.iter().enumerate() {
            if i > 0 {
                spans.push(Span::raw(" "));
            }
            spans.push(Span::styled(*key, Style::default().fg(Color::Cyan)));
            spans.push(Span::styled(
                format!(" {desc}"),
                Style::default().fg(Color::DarkGray),
            ));
        }
        Line::from(spans)
    };

    let footer = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(footer, area);
}
