//! Append-only progress output.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::pipeline::{PipelineState, ProgressSink};

use super::board::state_tone;

/// Prints each state change and output line on its own line.
pub struct LinePrinter<W: Write + Send> {
    out: Mutex<W>,
    colors: bool,
}

impl<W: Write + Send> LinePrinter<W> {
    pub fn new(out: W, colors: bool) -> Self {
        Self {
            out: Mutex::new(out),
            colors,
        }
    }

    /// Consumes the printer and returns its writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{text}").and_then(|()| out.flush()) {
            tracing::debug!(error = %e, "Failed to write progress line");
        }
    }
}

impl<W: Write + Send> ProgressSink for LinePrinter<W> {
    fn state(&self, version: &str, state: &PipelineState) {
        if *state == PipelineState::Pending {
            return;
        }
        let text = format!("{version}\t| {state}");
        self.emit(&state_tone(state).paint(&text, self.colors));
    }

    fn line(&self, version: &str, line: &str) {
        self.emit(&format!("{version}\t| {line}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    #[test]
    fn test_prints_states_and_lines_in_order() {
        let printer = LinePrinter::new(Vec::new(), false);

        printer.state("5.10.1", &PipelineState::Pending);
        printer.state("5.10.1", &PipelineState::Active(Stage::Pulling));
        printer.line("5.10.1", "Pull complete");
        printer.state("5.10.1", &PipelineState::Succeeded { success: true });

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(
            out,
            "5.10.1\t| Pulling base image\n5.10.1\t| Pull complete\n5.10.1\t| Done running all the tests!\n"
        );
    }
}
