//! Live per-version status lines, redrawn in place.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::pipeline::{PipelineState, ProgressSink};

use super::color::Tone;

struct Row {
    version: String,
    message: String,
    tone: Tone,
}

struct BoardState<W> {
    rows: Vec<Row>,
    out: W,
}

/// One status line per version, kept in first-seen order.
///
/// The board owns its rows and its writer; every update rewrites the whole
/// block starting at `top_row`, so concurrent pipelines never interleave
/// partial lines.
pub struct StatusBoard<W: Write + Send> {
    state: Mutex<BoardState<W>>,
    top_row: u16,
    colors: bool,
}

impl<W: Write + Send> StatusBoard<W> {
    /// Creates a board drawing from terminal row `top_row` (1-based).
    pub fn new(out: W, top_row: u16, colors: bool) -> Self {
        Self {
            state: Mutex::new(BoardState {
                rows: Vec::new(),
                out,
            }),
            top_row: top_row.max(1),
            colors,
        }
    }

    /// Current rows as plain `version - message` text.
    pub fn snapshot(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .rows
            .iter()
            .map(|row| format!("{}\t- {}", row.version, row.message))
            .collect()
    }

    /// Consumes the board and returns its writer.
    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn update(&self, version: &str, message: String, tone: Tone) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match state.rows.iter().position(|row| row.version == version) {
            Some(index) => {
                let row = &mut state.rows[index];
                row.message = message;
                row.tone = tone;
            }
            None => state.rows.push(Row {
                version: version.to_string(),
                message,
                tone,
            }),
        }

        let mut frame = format!("\x1b[{};1H\x1b[J", self.top_row);
        for row in &state.rows {
            let line = format!("{}\t- {}", row.version, row.message);
            frame.push_str(&row.tone.paint(&line, self.colors));
            frame.push('\n');
        }

        let written = state
            .out
            .write_all(frame.as_bytes())
            .and_then(|()| state.out.flush());
        if let Err(e) = written {
            tracing::debug!(error = %e, "Failed to redraw status board");
        }
    }
}

/// Tone used for a state on the board and in line output.
pub(crate) fn state_tone(state: &PipelineState) -> Tone {
    match state {
        PipelineState::Pending => Tone::Plain,
        PipelineState::Active(_) => Tone::Yellow,
        PipelineState::Succeeded { success: true } => Tone::Green,
        PipelineState::Succeeded { success: false } | PipelineState::Failed { .. } => Tone::Red,
    }
}

impl<W: Write + Send> ProgressSink for StatusBoard<W> {
    fn state(&self, version: &str, state: &PipelineState) {
        self.update(version, state.to_string(), state_tone(state));
    }

    // Verbose output is only requested in single-version runs, which use
    // `LinePrinter` instead.
    fn line(&self, _version: &str, _line: &str) {}
}
