use crate::app::{AppContext, AppState, NARROW_WIDTH_THRESHOLD};
use crate::input::Focus;
use crate::tui::{footer, header, list, panels};
use crate::view::ViewId;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

/// Screen regions for one frame.
#[derive(Debug, Clone, Copy)]
pub struct Areas {
    pub header: Rect,
    pub list: Rect,
    pub steps: Rect,
    pub detail: Rect,
    pub log: Rect,
    pub footer: Rect,
}

/// Split the screen: header, body, footer. The body puts the run list beside the
/// steps/detail/log column, or above it on narrow terminals.
pub fn layout(area: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // header
            Constraint::Min(1),    // body
            Constraint::Length(2), // footer
        ])
        .split(area);

    let direction = if area.width < NARROW_WIDTH_THRESHOLD {
        Direction::Vertical
    } else {
        Direction::Horizontal
    };
    let body = Layout::default()
        .direction(direction)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(rows[1]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(30),
            Constraint::Percentage(40),
        ])
        .split(body[1]);

    Areas {
        header: rows[0],
        list: body[0],
        steps: right[0],
        detail: right[1],
        log: right[2],
        footer: rows[2],
    }
}

/// Visible lines of the log panel in a terminal of `width`×`height`.
pub fn log_height(width: u16, height: u16) -> usize {
    layout(Rect::new(0, 0, width, height))
        .log
        .height
        .saturating_sub(2) as usize
}

pub fn render(f: &mut Frame, state: &AppState, ctx: &AppContext) {
    let areas = layout(f.area());

    header::render(f, areas.header, state, ctx);
    list::render(f, areas.list, state);
    panels::render(
        f,
        areas.steps,
        state.panels.get(ViewId::Steps),
        state.focus == Focus::Steps,
    );
    panels::render(f, areas.detail, state.panels.get(ViewId::StepDetail), false);
    panels::render(
        f,
        areas.log,
        state.panels.get(ViewId::CommandLog),
        state.focus == Focus::Log,
    );
    footer::render(f, areas.footer, state);

    // Error overlay
    if let Some(err) = state.error_message() {
        let area = f.area();
        if area.height > 6 && area.width >= 4 {
            let err_area = Rect {
                x: area.x + 1,
                y: area.y + area.height.saturating_sub(5),
                width: area.width.saturating_sub(2),
                height: 3,
            };
            let err_widget = Paragraph::new(err.to_owned())
                .style(Style::default().fg(Color::Red))
                .block(
                    Block::default()
                        .title(" Error ")
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Red)),
                )
                .wrap(Wrap { trim: true });
            f.render_widget(ratatui::widgets::Clear, err_area);
            f.render_widget(err_widget, err_area);
        }
    }
}
