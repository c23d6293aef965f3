//! Emoji and colors for the one-line status messages.

use crossterm::style::Stylize;
use std::io::IsTerminal;

pub mod emoji {
    pub const CANCEL: &str = "🛑";
    pub const ERROR: &str = "❌";
    pub const STAGE: &str = "📍";
    pub const SUCCESS: &str = "✅";
    pub const WARNING: &str = "⚠️";
}

pub fn with(emoji: &str, message: &str) -> String {
    format!("{} {}", emoji, message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    color: bool,
}

impl Palette {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Color only when asked for and stderr is a terminal.
    pub fn detect(no_color: bool) -> Self {
        Self::new(!no_color && std::io::stderr().is_terminal())
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    pub fn cancelled(&self, msg: &str) -> String {
        self.paint(with(emoji::CANCEL, msg), |s| s.magenta())
    }

    fn paint(
        &self,
        text: String,
        style: impl FnOnce(String) -> crossterm::style::StyledContent<String>,
    ) -> String {
        if self.color {
            style(text).to_string()
        } else {
            text
        }
    }

    pub fn success(&self, msg: &str) -> String {
        self.paint(with(emoji::SUCCESS, msg), |s| s.green().bold())
    }

    pub fn warning(&self, msg: &str) -> String {
        self.paint(with(emoji::WARNING, msg), |s| s.yellow())
    }

    pub fn failure(&self, msg: &str) -> String {
        self.paint(with(emoji::ERROR, msg), |s| s.red().bold())
    }

    pub fn stage(&self, msg: &str) -> String {
        self.paint(with(emoji::STAGE, msg), |s| s.cyan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_palette_has_no_escape_codes() {
        let p = Palette::plain();
        assert_eq!(p.failure("mount failed"), "❌ mount failed");
        assert!(!p.success("done").contains('\x1b'));
    }

    #[test]
    fn colored_palette_wraps_in_ansi() {
        let p = Palette::new(true);
        assert!(p.failure("x").starts_with('\x1b'));
    }
}
