//! Terminal presentation of pipeline progress and results.
//!
//! Two [`ProgressSink`](crate::pipeline::ProgressSink) implementations:
//!
//! - [`StatusBoard`] keeps one line per version and redraws the block in
//!   place whenever a version changes stage (many versions at once).
//! - [`LinePrinter`] prints every state change and output line as it
//!   arrives (single version, or output that is not a terminal).
//!
//! [`summary`] renders the final report.

pub mod board;
pub mod color;
pub mod printer;
pub mod summary;

pub use board::StatusBoard;
pub use color::Tone;
pub use printer::LinePrinter;
pub use summary::{render_results, render_version_list};
