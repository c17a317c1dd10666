//! Facts about the project under test.
//!
//! Used to label images and staging directories and to pick the Dockerfile
//! template. None of this is needed by the pipeline itself; it is resolved
//! once per invocation and baked into the requests.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;

use crate::error::ProjectError;
use crate::staging::PLACEHOLDER;

/// File in the project root that overrides the built-in Dockerfile template.
pub const TEMPLATE_FILE_NAME: &str = "DockerTemplate";

/// Template used when the project has no `DockerTemplate`.
pub const DEFAULT_DOCKERFILE_TEMPLATE: &str = "FROM mhart/alpine-node:$VERSION
RUN mkdir -p /usr/src/app
WORKDIR /usr/src/app
COPY package.json .
RUN npm install
COPY . .
";

/// Revision label used outside of a git checkout.
const FALLBACK_REVISION: &str = "latest";

#[derive(Debug, Deserialize)]
struct PackageManifest {
    name: Option<String>,
}

/// Name and revision of the project being tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub root: PathBuf,
    pub name: String,
    pub revision: String,
}

impl ProjectInfo {
    /// Inspects the project at `root`.
    ///
    /// # Errors
    ///
    /// Returns `ProjectError::MissingDirectory` if `root` is not a directory,
    /// or `ProjectError::Manifest` if `package.json` exists but is not JSON.
    pub async fn discover(root: &Path) -> Result<Self, ProjectError> {
        if !tokio::fs::metadata(root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ProjectError::MissingDirectory(root.to_path_buf()));
        }

        let name = project_name(root).await?;
        let revision = git_revision(root).await;
        tracing::debug!(project = %name, revision = %revision, "Discovered project");

        Ok(Self {
            root: root.to_path_buf(),
            name,
            revision,
        })
    }

    /// Image tag template, e.g. `my-app_$VERSION:3f1c...`.
    pub fn image_name_template(&self) -> String {
        let name = self.name.to_lowercase().replace(['@', '/', ' '], "_");
        let name = name.trim_matches('_');
        format!("{name}_{PLACEHOLDER}:{}", self.revision)
    }
}

/// Resolves the display name: `package.json`, then `Cargo.toml`, then the
/// directory name.
async fn project_name(root: &Path) -> Result<String, ProjectError> {
    let package_json = root.join("package.json");
    if let Some(contents) = read_optional(&package_json).await? {
        let manifest: PackageManifest =
            serde_json::from_str(&contents).map_err(|e| ProjectError::Manifest {
                path: package_json.clone(),
                message: e.to_string(),
            })?;
        if let Some(name) = manifest.name.filter(|n| !n.trim().is_empty()) {
            return Ok(name);
        }
    }

    if let Some(contents) = read_optional(&root.join("Cargo.toml")).await? {
        if let Some(name) = cargo_package_name(&contents) {
            return Ok(name);
        }
    }

    Ok(root
        .canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string()))
}

/// First `name = "..."` inside the `[package]` table.
fn cargo_package_name(manifest: &str) -> Option<String> {
    let mut in_package = false;
    for line in manifest.lines().map(str::trim) {
        if line.starts_with('[') {
            in_package = line == "[package]";
            continue;
        }
        if !in_package {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "name" {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// `git rev-parse HEAD`, or a fixed label when unavailable.
async fn git_revision(root: &Path) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["rev-parse", "HEAD"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let revision = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if revision.is_empty() {
                FALLBACK_REVISION.to_string()
            } else {
                revision
            }
        }
        Ok(out) => {
            tracing::debug!(stderr = %String::from_utf8_lossy(&out.stderr).trim(), "Not a git checkout");
            FALLBACK_REVISION.to_string()
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to run git");
            FALLBACK_REVISION.to_string()
        }
    }
}

/// Loads the Dockerfile template from `path`, or the built-in default when
/// the file does not exist.
pub async fn load_template(path: &Path) -> Result<String, ProjectError> {
    match read_optional(path).await? {
        Some(template) => {
            tracing::info!(path = %path.display(), "Using custom Dockerfile template");
            Ok(template)
        }
        None => Ok(DEFAULT_DOCKERFILE_TEMPLATE.to_string()),
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, ProjectError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProjectError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_name_from_package_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "test_project", "version": "0.0.1"}"#,
        )
        .unwrap();

        let info = ProjectInfo::discover(dir.path()).await.expect("discover");

        assert_eq!(info.name, "test_project");
        assert!(!info.revision.is_empty());
    }

    #[tokio::test]
    async fn test_name_from_cargo_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("Cargo.toml"),
            "[workspace]\nname = \"nope\"\n\n[package]\nname = \"crate-under-test\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        let info = ProjectInfo::discover(dir.path()).await.expect("discover");
        assert_eq!(info.name, "crate-under-test");
    }

    #[tokio::test]
    async fn test_name_falls_back_to_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("plain-dir");
        fs::create_dir(&root).unwrap();

        let info = ProjectInfo::discover(&root).await.expect("discover");
        assert_eq!(info.name, "plain-dir");
    }

    #[tokio::test]
    async fn test_invalid_package_json_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("package.json"), "{ not json").unwrap();

        let err = ProjectInfo::discover(dir.path()).await.unwrap_err();
        assert!(matches!(err, ProjectError::Manifest { .. }));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let err = ProjectInfo::discover(Path::new("/somemadeuppath/project"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::MissingDirectory(_)));
    }

    #[tokio::test]
    async fn test_template_file_overrides_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(TEMPLATE_FILE_NAME);

        let default = load_template(&path).await.unwrap();
        assert_eq!(default, DEFAULT_DOCKERFILE_TEMPLATE);

        fs::write(&path, "FROM golang:$VERSION\n").unwrap();
        let custom = load_template(&path).await.unwrap();
        assert_eq!(custom, "FROM golang:$VERSION\n");
    }

    #[test]
    fn test_image_name_template() {
        let info = ProjectInfo {
            root: PathBuf::from("/src/app"),
            name: "@Scope/My App".to_string(),
            revision: "abc123".to_string(),
        };
        assert_eq!(info.image_name_template(), "scope_my_app_$VERSION:abc123");
    }
}
