//! Final results rendering.

use crate::pipeline::AggregateRunReport;

use super::color::Tone;

/// Renders the results block printed after all versions settle.
///
/// Captured output of failing versions is appended unless it was already
/// streamed live (`output_streamed`).
pub fn render_results(report: &AggregateRunReport, colors: bool, output_streamed: bool) -> String {
    let mut out = String::new();

    out.push('\n');
    if report.total == 1 {
        out.push_str("== Results ==\n");
    } else {
        out.push_str(&format!(
            "== Results (Success/Fail {}/{}) ==\n",
            report.successes(),
            report.failures()
        ));
    }

    for version in &report.passed {
        let line = format!("The tests did pass on version {version}");
        out.push_str(&Tone::Green.paint(&line, colors));
        out.push('\n');
    }

    for failed in &report.failed {
        let line = match failed.stage {
            Some(stage) => format!(
                "Something went wrong while {stage} for version {}",
                failed.version
            ),
            None => format!("The tests did not pass on version {}", failed.version),
        };
        out.push_str(&Tone::Red.paint(&line, colors));
        out.push('\n');
    }

    if !output_streamed {
        for failed in report.failed.iter().filter(|f| !f.output.trim().is_empty()) {
            let header = format!("\n--- Output for version {} ---", failed.version);
            out.push_str(&Tone::Blue.paint(&header, colors));
            out.push('\n');
            out.push_str(failed.output.trim_end());
            out.push('\n');
        }
    }

    out
}

/// Renders the `ls` listing.
pub fn render_version_list(versions: &[String]) -> String {
    let mut out = String::from("Available versions:\n");
    for version in versions {
        out.push_str("  ");
        out.push_str(version);
        out.push('\n');
    }
    out
}
