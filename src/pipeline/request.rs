//! Inputs and outputs of a single pipeline invocation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::staging::PLACEHOLDER;

/// Everything needed to test one version.
///
/// Build it with [`VersionRunRequest::builder`], which rejects missing
/// fields and templates without the `$VERSION` placeholder up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRunRequest {
    /// Runtime version under test, e.g. "5.10.1".
    pub version: String,
    /// Display name of the project.
    pub project_name: String,
    /// Location of the un-staged project.
    pub source_path: PathBuf,
    /// Image tag template, e.g. "my-app_$VERSION:abc123".
    pub image_name_template: String,
    /// Dockerfile template.
    pub dockerfile_template: String,
    /// Image pulled as `base_image:version` before building.
    pub base_image: String,
    /// Command run inside the test container.
    pub test_command: Vec<String>,
    /// Stream engine and container output while running.
    pub verbose: bool,
}

impl VersionRunRequest {
    /// Starts a request for `version`.
    pub fn builder(version: impl Into<String>) -> VersionRunRequestBuilder {
        VersionRunRequestBuilder {
            request: VersionRunRequest {
                version: version.into(),
                project_name: String::new(),
                source_path: PathBuf::new(),
                image_name_template: String::new(),
                dockerfile_template: String::new(),
                base_image: String::new(),
                test_command: Vec::new(),
                verbose: false,
            },
        }
    }

    /// Same request, aimed at another version.
    pub fn for_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    /// Checks required fields in declaration order, then both templates.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Configuration` naming the first problem found.
    pub fn validate(&self) -> Result<(), StageError> {
        let missing = [
            ("version", self.version.trim().is_empty()),
            ("project_name", self.project_name.trim().is_empty()),
            ("source_path", self.source_path.as_os_str().is_empty()),
            ("image_name_template", self.image_name_template.trim().is_empty()),
            ("dockerfile_template", self.dockerfile_template.trim().is_empty()),
            ("base_image", self.base_image.trim().is_empty()),
            ("test_command", self.test_command.is_empty()),
        ]
        .into_iter()
        .find(|(_, missing)| *missing);

        if let Some((field, _)) = missing {
            return Err(StageError::Configuration(format!(
                "missing required field '{field}'"
            )));
        }

        for (field, template) in [
            ("image_name_template", &self.image_name_template),
            ("dockerfile_template", &self.dockerfile_template),
        ] {
            if !template.contains(PLACEHOLDER) {
                return Err(StageError::Configuration(format!(
                    "{field} missing required placeholder {PLACEHOLDER}"
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`VersionRunRequest`].
#[derive(Debug, Clone)]
pub struct VersionRunRequestBuilder {
    request: VersionRunRequest,
}

impl VersionRunRequestBuilder {
    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.request.project_name = name.into();
        self
    }

    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.request.source_path = path.into();
        self
    }

    pub fn image_name_template(mut self, template: impl Into<String>) -> Self {
        self.request.image_name_template = template.into();
        self
    }

    pub fn dockerfile_template(mut self, template: impl Into<String>) -> Self {
        self.request.dockerfile_template = template.into();
        self
    }

    pub fn base_image(mut self, image: impl Into<String>) -> Self {
        self.request.base_image = image.into();
        self
    }

    pub fn test_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request.test_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.request.verbose = verbose;
        self
    }

    /// Validates and returns the request.
    pub fn build(self) -> Result<VersionRunRequest, StageError> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// Verdict and captured output for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRunResult {
    pub version: String,
    /// True iff the test command exited with status 0.
    pub success: bool,
    /// Combined stdout/stderr of the test command, in arrival order.
    pub output: String,
}
