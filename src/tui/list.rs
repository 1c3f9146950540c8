use crate::app::AppState;
use crate::input::Focus;
use crate::model::{truncate, Run, RunKind};
use crate::tui::{panels, spinner, status_icon};
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

pub fn render(f: &mut Frame, area: Rect, state: &AppState) {
    let loader = state.active_loader();
    let panel = state.panels.get(loader.view());
    let block = panels::block(panel, state.focus == Focus::List);
    let inner = block.inner(area);
    f.render_widget(block, area);

    // A failed page keeps the rows already loaded; show the error beneath them.
    let mut reserved = 0;
    if let Some(err) = panel.error() {
        reserved = 1.min(inner.height);
        let err_area = Rect {
            y: inner.y + inner.height.saturating_sub(reserved),
            height: reserved,
            ..inner
        };
        f.render_widget(
            Paragraph::new(err.to_owned()).style(Style::default().fg(Color::Red)),
            err_area,
        );
    }
    let rows_area = Rect {
        height: inner.height.saturating_sub(reserved),
        ..inner
    };

    if loader.items().is_empty() {
        let msg = if loader.is_loading() {
            "Loading…"
        } else if loader.pagination().is_some() {
            match loader.feed() {
                RunKind::Pipeline => "No pipelines found",
                RunKind::PullRequest => "No pull requests found",
            }
        } else {
            ""
        };
        f.render_widget(
            Paragraph::new(msg).style(Style::default().fg(Color::DarkGray)),
            rows_area,
        );
        return;
    }

    let visible_height = rows_area.height as usize;
    let cursor = loader.cursor();
    let scroll_offset = if cursor >= visible_height {
        cursor - visible_height + 1
    } else {
        0
    };
    let narrow = area.width < crate::app::NARROW_WIDTH_THRESHOLD;
    let width = rows_area.width as usize;

    let mut lines: Vec<Line> = loader
        .items()
        .iter()
        .enumerate()
        .skip(scroll_offset)
        .take(visible_height)
        .map(|(i, run)| render_run_line(run, i == cursor, narrow, width))
        .collect();

    if loader.is_loading() && lines.len() < visible_height {
        let frame = panel.busy.unwrap_or(0);
        lines.push(Line::from(Span::styled(
            format!("  {} loading more…", spinner(frame)),
            Style::default().fg(Color::DarkGray),
        )));
    }

    f.render_widget(Paragraph::new(lines), rows_area);
}

fn render_run_line(run: &Run, is_selected: bool, narrow: bool, max_width: usize) -> Line<'static> {
    let (icon, icon_color) = status_icon(run.state.class());
    let number = match run.kind {
        RunKind::Pipeline => format!("#{}", run.number),
        RunKind::PullRequest => format!("!{}", run.number),
    };
    let duration = run.duration_label();
    let branch = run.target.branch.clone();

    let prefix_width = 1 + UnicodeWidthStr::width(icon) + 1 + number.len() + 1;
    let suffix_width = if narrow {
        0
    } else {
        duration.len() + 1 + UnicodeWidthStr::width(branch.as_str()) + 1
    };
    let title = truncate(&run.title, max_width.saturating_sub(prefix_width + suffix_width));

    let select_style = if is_selected {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    };

    let mut spans = vec![
        Span::styled(format!(" {icon} "), Style::default().fg(icon_color)),
        Span::styled(format!("{number} "), Style::default().fg(Color::DarkGray)),
        Span::styled(title, select_style),
    ];
    if !narrow {
        spans.push(Span::styled(
            format!(" {duration}"),
            Style::default().fg(Color::DarkGray),
        ));
        spans.push(Span::styled(format!(" {branch}"), Style::default().fg(Color::Blue)));
    }
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppConfig;
    use crate::error::Error;
    use crate::model::Target;
    use crate::status::StepState;
    use crate::task::SupersedePolicy;
    use crate::view::{ViewId, ViewTarget};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn state() -> AppState {
        AppState::new(&AppConfig {
            workspace: "acme".into(),
            repo: "api".into(),
            page_len: 10,
            poll_interval: 10,
            desktop_notify: false,
            demo: false,
            supersede: SupersedePolicy::LastWriteWins,
        })
    }

    fn rendered(state: &AppState, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|f| render(f, f.area(), state)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .chunks(width as usize)
            .map(|row| row.iter().map(|c| c.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn page_error_is_shown_in_the_list() {
        let mut state = state();
        state
            .panels
            .get_mut(ViewId::Pipelines)
            .display_error(&Error::Network("connection refused".into()));
        let screen = rendered(&state, 60, 6);
        assert!(screen.contains("Pipelines"));
        assert!(screen.contains("connection refused"));
    }

    #[test]
    fn narrow_rows_drop_the_branch() {
        let run = Run {
            id: "{pipeline-3}".into(),
            kind: RunKind::Pipeline,
            number: 3,
            title: "Build #3".into(),
            state: StepState::PASSED,
            created_at: chrono::Utc::now(),
            completed_at: None,
            target: Target {
                branch: "release".into(),
                commit: None,
            },
            duration_secs: Some(65),
            author: "dev".into(),
            url: String::new(),
        };
        let text = |line: Line| line.spans.iter().map(|s| s.content.to_string()).collect::<String>();

        let wide = text(render_run_line(&run, false, false, 60));
        assert!(wide.contains("#3"));
        assert!(wide.contains("release"));
        let narrow = text(render_run_line(&run, true, true, 30));
        assert!(narrow.contains("Build #3"));
        assert!(!narrow.contains("release"));
    }
}
