//! Version-specific Dockerfile generation.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::StageError;

/// Token replaced with the version under test in image names and templates.
pub const PLACEHOLDER: &str = "$VERSION";

/// File name the generated image definition is written to.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Replaces the first placeholder in `template` with `version`.
///
/// `what` names the template in the error message.
pub fn substitute_version(template: &str, version: &str, what: &str) -> Result<String, StageError> {
    if !template.contains(PLACEHOLDER) {
        return Err(StageError::Configuration(format!(
            "{what} template missing required placeholder {PLACEHOLDER}"
        )));
    }
    Ok(template.replacen(PLACEHOLDER, version, 1))
}

/// Writes `template` with `version` substituted to `directory/Dockerfile`.
///
/// The template is validated before the filesystem is touched.
pub async fn write_dockerfile(
    directory: &Path,
    version: &str,
    template: &str,
) -> Result<PathBuf, StageError> {
    let contents = substitute_version(template, version, "image definition")?;

    match tokio::fs::metadata(directory).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(StageError::io(
                directory,
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StageError::NotFound(directory.to_path_buf()))
        }
        Err(e) => return Err(StageError::io(directory, e)),
    }

    let path = directory.join(DOCKERFILE_NAME);
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| StageError::io(&path, e))?;

    Ok(path)
}
