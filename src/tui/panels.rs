//! Steps, step detail and command log panels.

use crate::model::{compute_duration, truncate, Step};
use crate::tui::{spinner, status_icon};
use crate::view::{Panel, PanelContent, ViewTarget, Widget};
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

/// Bordered frame titled with the panel name, plus a spinner while busy.
pub fn block(panel: &Panel, focused: bool) -> Block<'static> {
    let mut title = format!(" {} ", panel.id().title());
    if let Some(frame) = panel.busy {
        title.push(spinner(frame));
        title.push(' ');
    }
    let border = if focused { Color::Cyan } else { Color::DarkGray };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
}

pub fn render(f: &mut Frame, area: Rect, panel: &Panel, focused: bool) {
    let mut block = block(panel, focused);
    let inner_height = area.height.saturating_sub(2) as usize;
    let inner_width = area.width.saturating_sub(2) as usize;

    let paragraph = match &panel.content {
        PanelContent::Empty => Paragraph::new(""),
        PanelContent::Error(msg) => Paragraph::new(msg.clone())
            .style(Style::default().fg(Color::Red))
            .wrap(Wrap { trim: true }),
        PanelContent::Text(text) => {
            let total = panel.line_count();
            if total > inner_height {
                block = block.title_bottom(
                    Line::from(format!(
                        " [{}-{}/{}] ",
                        panel.scroll + 1,
                        (panel.scroll + inner_height).min(total),
                        total
                    ))
                    .right_aligned(),
                );
            }
            let lines: Vec<Line> = text
                .lines()
                .skip(panel.scroll)
                .take(inner_height)
                .map(|l| Line::from(Span::raw(l.to_owned())))
                .collect();
            Paragraph::new(lines)
        }
        PanelContent::Widget(Widget::Steps { steps, selected }) => {
            let offset = selected.saturating_sub(inner_height.saturating_sub(1));
            let lines: Vec<Line> = steps
                .iter()
                .enumerate()
                .skip(offset)
                .take(inner_height)
                .map(|(i, step)| step_line(step, i == *selected, focused, inner_width))
                .collect();
            Paragraph::new(lines)
        }
        PanelContent::Widget(Widget::Detail { lines, .. }) => {
            Paragraph::new(detail_lines(lines, inner_width))
        }
    };

    f.render_widget(paragraph.block(block), area);
}

fn step_line(step: &Step, is_selected: bool, focused: bool, max_width: usize) -> Line<'static> {
    let (icon, color) = status_icon(step.state.class());
    let duration = compute_duration(step.started_at, step.completed_at);
    let name_max = max_width.saturating_sub(3 + duration.len() + 1);
    let style = match (is_selected, focused) {
        (true, true) => Style::default().add_modifier(Modifier::REVERSED),
        (true, false) => Style::default().add_modifier(Modifier::BOLD),
        _ => Style::default(),
    };
    Line::from(vec![
        Span::styled(format!(" {icon} "), Style::default().fg(color)),
        Span::styled(truncate(&step.name, name_max), style),
        Span::styled(format!(" {duration}"), Style::default().fg(Color::DarkGray)),
    ])
}

fn detail_lines(rows: &[(String, String)], inner_width: usize) -> Vec<Line<'static>> {
    let label_width = rows
        .iter()
        .map(|(l, _)| UnicodeWidthStr::width(l.as_str()))
        .max()
        .unwrap_or(0);
    let value_max = inner_width.saturating_sub(label_width + 2);
    rows.iter()
        .map(|(label, value)| {
            Line::from(vec![
                Span::styled(
                    format!("{label:>label_width$}  "),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(truncate(value, value_max), Style::default().fg(Color::White)),
            ])
        })
        .collect()
}
