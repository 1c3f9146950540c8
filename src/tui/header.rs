use crate::app::{AppContext, AppState};
use crate::model::RunKind;
use crate::tui::spinner;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

pub fn render(f: &mut Frame, area: Rect, state: &AppState, ctx: &AppContext) {
    let mut spans = vec![
        Span::styled(
            format!(" bbw v{} ", env!("CARGO_PKG_VERSION")),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("│ "),
        Span::styled(
            ctx.config.repo_label(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if ctx.config.demo {
        spans.push(Span::styled(" [demo]", Style::default().fg(Color::Magenta)));
    }

    spans.push(Span::raw("  "));
    for (i, kind) in [RunKind::Pipeline, RunKind::PullRequest].into_iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" │ ", Style::default().fg(Color::DarkGray)));
        }
        let style = if kind == state.feed {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(tab_label(kind, state), style));
    }

    let list_panel = state.panels.get(crate::loader::feed_view(state.feed));
    if let Some(frame) = list_panel.busy {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            spinner(frame).to_string(),
            Style::default().fg(Color::Yellow),
        ));
    } else if let Some(secs) = state.next_poll_in() {
        spans.push(Span::styled(
            format!(" {secs}s"),
            Style::default().fg(Color::DarkGray),
        ));
    }

    if state.refresh_failures > 0 {
        spans.push(Span::styled(
            format!(" retry {}", state.refresh_failures),
            Style::default().fg(Color::Red),
        ));
    }

    if state.error_message().is_some() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            "!",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(header, area);
}

/// "Pipelines (20+)" once a page is in, plain title before that.
fn tab_label(kind: RunKind, state: &AppState) -> String {
    let view = crate::loader::feed_view(kind);
    let loader = state.loader(kind);
    if loader.pagination().is_none() {
        return view.title().to_string();
    }
    let more = if loader.is_exhausted() { "" } else { "+" };
    format!("{} ({}{more})", view.title(), loader.items().len())
}
