//! ANSI colouring.

/// Colour applied to a piece of terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Green,
    Red,
    Yellow,
    Blue,
}

impl Tone {
    fn code(&self) -> Option<&'static str> {
        match self {
            Tone::Plain => None,
            Tone::Green => Some("\x1b[32m"),
            Tone::Red => Some("\x1b[31m"),
            Tone::Yellow => Some("\x1b[33m"),
            Tone::Blue => Some("\x1b[34m"),
        }
    }

    /// Wraps `text` in this tone's escape codes when `enabled`.
    pub fn paint(&self, text: &str, enabled: bool) -> String {
        match self.code() {
            Some(code) if enabled => format!("{code}{text}\x1b[0m"),
            _ => text.to_string(),
        }
    }
}
