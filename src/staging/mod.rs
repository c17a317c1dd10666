//! Per-version staging directories.
//!
//! Each version under test gets its own filtered copy of the project
//! ([`copier`]) with a version-specific Dockerfile written into it
//! ([`dockerfile`]).

pub mod copier;
pub mod dockerfile;

use std::path::{Path, PathBuf};

pub use copier::{copy_project, CopyFilter};
pub use dockerfile::{substitute_version, write_dockerfile, DOCKERFILE_NAME, PLACEHOLDER};

/// Staging location for `project` at `version` under `root`.
///
/// Unique per (project, version), so concurrent pipelines never share one.
pub fn staging_path(root: &Path, project: &str, version: &str) -> PathBuf {
    let project = project.replace(['/', '\\', ' '], "_");
    let version = version.replace(['/', '\\', ' '], "_");
    root.join(format!("autochecker_{project}{version}"))
}
