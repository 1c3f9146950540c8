pub mod footer;
pub mod header;
pub mod list;
pub mod panels;
pub mod render;

use crate::status::StatusClass;
use ratatui::style::Color;

const BRAILLE_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Busy-indicator glyph for a frame counter.
pub fn spinner(frame: usize) -> char {
    BRAILLE_FRAMES[frame % BRAILLE_FRAMES.len()]
}

pub fn status_icon(class: StatusClass) -> (&'static str, Color) {
    match class {
        StatusClass::Success => ("✓", Color::Green),
        StatusClass::Failure => ("✗", Color::Red),
        StatusClass::Stopped => ("⊘", Color::Yellow),
        StatusClass::Running => ("⟳", Color::Yellow),
        StatusClass::Waiting => ("○", Color::Blue),
        StatusClass::Neutral => ("·", Color::DarkGray),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_wraps() {
        assert_eq!(spinner(0), spinner(BRAILLE_FRAMES.len()));
        let _ = spinner(usize::MAX);
    }

    #[test]
    fn spinner_frames_are_braille() {
        for &ch in BRAILLE_FRAMES {
            assert!(('\u{2800}'..='\u{28FF}').contains(&ch), "{ch:?}");
        }
    }

    #[test]
    fn failure_is_red() {
        assert_eq!(status_icon(StatusClass::Failure), ("✗", Color::Red));
        assert_eq!(status_icon(StatusClass::Success).1, Color::Green);
    }
}
