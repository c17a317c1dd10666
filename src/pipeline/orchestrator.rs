//! Sequences the five stages for one version.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::ContainerEngine;
use crate::error::{PipelineError, StageError};
use crate::staging::{copy_project, staging_path, substitute_version, write_dockerfile, CopyFilter};

use super::request::{VersionRunRequest, VersionRunResult};
use super::sink::ProgressSink;
use super::stages::{build_image, pull_base_image, run_tests, StageContext};
use super::{PipelineState, Stage};

/// Whether a staging directory is kept after its run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetainPolicy {
    /// Keep it when every stage completed (whatever the test verdict).
    pub on_success: bool,
    /// Keep it when a stage failed, for post-mortem inspection.
    pub on_failure: bool,
}

impl Default for RetainPolicy {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: true,
        }
    }
}

impl RetainPolicy {
    /// Removes staging directories after every run.
    pub fn discard() -> Self {
        Self {
            on_success: false,
            on_failure: false,
        }
    }

    fn retains(&self, completed: bool) -> bool {
        if completed {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

/// Runs the copy → template → pull → build → run pipeline for a request.
///
/// The pipeline holds no per-run state: calling [`VersionPipeline::run`]
/// twice with the same request executes every stage twice.
#[derive(Clone)]
pub struct VersionPipeline {
    engine: Arc<dyn ContainerEngine>,
    sink: Arc<dyn ProgressSink>,
    staging_root: PathBuf,
    copy_filter: CopyFilter,
    retain: RetainPolicy,
}

impl VersionPipeline {
    /// Creates a pipeline staging under the system temp directory.
    pub fn new(engine: Arc<dyn ContainerEngine>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            engine,
            sink,
            staging_root: std::env::temp_dir(),
            copy_filter: CopyFilter::default(),
            retain: RetainPolicy::default(),
        }
    }

    /// Sets the directory staging copies are created in.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    /// Sets which project paths are left out of staging copies.
    pub fn with_copy_filter(mut self, filter: CopyFilter) -> Self {
        self.copy_filter = filter;
        self
    }

    /// Sets when staging directories are kept.
    pub fn with_retain_policy(mut self, retain: RetainPolicy) -> Self {
        self.retain = retain;
        self
    }

    /// Staging directory used for `request`.
    pub fn staging_dir(&self, request: &VersionRunRequest) -> PathBuf {
        staging_path(&self.staging_root, &request.project_name, &request.version)
    }

    /// Runs every stage for `request` and returns the test verdict.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` naming the first stage that failed. Later
    /// stages are not attempted.
    pub async fn run(&self, request: &VersionRunRequest) -> Result<VersionRunResult, PipelineError> {
        let version = request.version.as_str();
        self.sink.state(version, &PipelineState::Pending);

        let image_name = match request
            .validate()
            .and_then(|()| substitute_version(&request.image_name_template, version, "image name"))
        {
            Ok(name) => name,
            Err(source) => return Err(self.fail(version, Stage::Validating, source)),
        };

        let staging = self.staging_dir(request);
        let outcome = self.execute(request, &staging, &image_name).await;

        match &outcome {
            Ok(result) => {
                info!(version, success = result.success, "Version finished");
                self.sink.state(
                    version,
                    &PipelineState::Succeeded {
                        success: result.success,
                    },
                );
            }
            Err(e) => {
                warn!(version, stage = %e.stage, error = %e.source, "Version failed");
                self.sink.state(
                    version,
                    &PipelineState::Failed {
                        stage: e.stage,
                        message: e.source.to_string(),
                    },
                );
            }
        }

        if !self.retain.retains(outcome.is_ok()) {
            release_staging(&staging).await;
        }

        outcome
    }

    async fn execute(
        &self,
        request: &VersionRunRequest,
        staging: &Path,
        image_name: &str,
    ) -> Result<VersionRunResult, PipelineError> {
        let version = request.version.as_str();
        let ctx = StageContext {
            engine: self.engine.as_ref(),
            sink: self.sink.as_ref(),
            version,
            verbose: request.verbose,
        };
        let at = |stage: Stage| move |source: StageError| PipelineError {
            version: version.to_string(),
            stage,
            source,
        };

        self.enter(version, Stage::Copying);
        let copied = copy_project(&request.source_path, staging, &self.copy_filter)
            .await
            .map_err(at(Stage::Copying))?;
        debug!(version, files = copied, staging = %staging.display(), "Project staged");

        self.enter(version, Stage::Templating);
        write_dockerfile(staging, version, &request.dockerfile_template)
            .await
            .map_err(at(Stage::Templating))?;

        self.enter(version, Stage::Pulling);
        pull_base_image(&ctx, &request.base_image)
            .await
            .map_err(at(Stage::Pulling))?;

        self.enter(version, Stage::Building);
        build_image(&ctx, staging, image_name)
            .await
            .map_err(at(Stage::Building))?;

        self.enter(version, Stage::Running);
        let outcome = run_tests(&ctx, image_name, &request.test_command)
            .await
            .map_err(at(Stage::Running))?;

        Ok(VersionRunResult {
            version: version.to_string(),
            success: outcome.success,
            output: outcome.output,
        })
    }

    fn enter(&self, version: &str, stage: Stage) {
        debug!(version, %stage, "Entering stage");
        self.sink.state(version, &PipelineState::Active(stage));
    }

    fn fail(&self, version: &str, stage: Stage, source: StageError) -> PipelineError {
        warn!(version, %stage, error = %source, "Version failed");
        self.sink.state(
            version,
            &PipelineState::Failed {
                stage,
                message: source.to_string(),
            },
        );
        PipelineError {
            version: version.to_string(),
            stage,
            source,
        }
    }
}

async fn release_staging(staging: &Path) {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => debug!(staging = %staging.display(), "Removed staging directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(staging = %staging.display(), error = %e, "Failed to remove staging directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::engine::EngineEvent;
    use crate::pipeline::sink::recording::RecordingSink;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        project: TempDir,
        staging_root: TempDir,
        engine: Arc<MockEngine>,
        sink: Arc<RecordingSink>,
    }

    impl Fixture {
        fn new(engine: MockEngine) -> Self {
            let project = tempfile::tempdir().expect("tempdir");
            fs::create_dir_all(project.path().join(".git")).unwrap();
            fs::create_dir_all(project.path().join("node_modules")).unwrap();
            fs::write(project.path().join("package.json"), r#"{"name":"test_project"}"#).unwrap();
            Self {
                project,
                staging_root: tempfile::tempdir().expect("tempdir"),
                engine: Arc::new(engine),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn pipeline(&self) -> VersionPipeline {
            VersionPipeline::new(self.engine.clone(), self.sink.clone())
                .with_staging_root(self.staging_root.path())
        }

        fn request(&self) -> VersionRunRequest {
            VersionRunRequest::builder("1.1.1")
                .project_name("myproject")
                .source_path(self.project.path())
                .image_name_template("app/image_$VERSION:commit")
                .dockerfile_template("FROM nodejs:$VERSION")
                .base_image("base/image")
                .test_command(["whoami"])
                .build()
                .expect("valid request")
        }
    }

    #[tokio::test]
    async fn test_success_runs_all_stages_in_order() {
        let fixture = Fixture::new(MockEngine::default());
        let pipeline = fixture.pipeline();
        let request = fixture.request();

        let result = pipeline.run(&request).await.expect("pipeline should succeed");

        assert_eq!(result.version, "1.1.1");
        assert!(result.success);
        assert_eq!(result.output, "ok\n");
        assert_eq!(
            fixture.engine.calls(),
            vec![
                "pull base/image:1.1.1",
                "build app/image_1.1.1:commit",
                "run app/image_1.1.1:commit whoami",
            ]
        );
        assert_eq!(
            fixture.sink.states_for("1.1.1"),
            vec![
                PipelineState::Pending,
                PipelineState::Active(Stage::Copying),
                PipelineState::Active(Stage::Templating),
                PipelineState::Active(Stage::Pulling),
                PipelineState::Active(Stage::Building),
                PipelineState::Active(Stage::Running),
                PipelineState::Succeeded { success: true },
            ]
        );

        let staging = pipeline.staging_dir(&request);
        assert_eq!(
            fs::read_to_string(staging.join("Dockerfile")).unwrap(),
            "FROM nodejs:1.1.1"
        );
        assert!(!staging.join(".git").exists());
        assert!(!staging.join("node_modules").exists());
    }

    #[tokio::test]
    async fn test_failing_tests_are_a_result_not_an_error() {
        let fixture = Fixture::new(MockEngine {
            exit_code: Some(123),
            ..Default::default()
        });

        let result = fixture
            .pipeline()
            .run(&fixture.request())
            .await
            .expect("pipeline completes");

        assert!(!result.success);
        assert_eq!(
            fixture.sink.states_for("1.1.1").last(),
            Some(&PipelineState::Succeeded { success: false })
        );
    }

    #[tokio::test]
    async fn test_pull_failure_short_circuits() {
        let fixture = Fixture::new(MockEngine {
            fail_pull: true,
            ..Default::default()
        });

        let err = fixture
            .pipeline()
            .run(&fixture.request())
            .await
            .expect_err("pull failure must fail the pipeline");

        assert_eq!(err.stage, Stage::Pulling);
        assert_eq!(err.version, "1.1.1");
        assert_eq!(fixture.engine.calls(), vec!["pull base/image:1.1.1"]);
        assert!(matches!(
            fixture.sink.states_for("1.1.1").last(),
            Some(PipelineState::Failed {
                stage: Stage::Pulling,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_embedded_build_error_fails_building_stage() {
        let fixture = Fixture::new(MockEngine {
            build_events: vec![EngineEvent::log("Step 1/1\n"), EngineEvent::error("boom")],
            ..Default::default()
        });

        let err = fixture.pipeline().run(&fixture.request()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Building);
        assert!(matches!(err.source, StageError::Build(ref m) if m == "boom"));
        assert!(!fixture.engine.calls().iter().any(|c| c.starts_with("run")));
    }

    #[tokio::test]
    async fn test_missing_source_fails_copying() {
        let fixture = Fixture::new(MockEngine::default());
        let mut request = fixture.request();
        request.source_path = PathBuf::from("/somemadeuppath/");

        let err = fixture.pipeline().run(&request).await.unwrap_err();

        assert_eq!(err.stage, Stage::Copying);
        assert!(fixture.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_side_effects() {
        let fixture = Fixture::new(MockEngine::default());
        let mut request = fixture.request();
        request.dockerfile_template = "FROM nodejs:latest".to_string();

        let pipeline = fixture.pipeline();
        let err = pipeline.run(&request).await.unwrap_err();

        assert_eq!(err.stage, Stage::Validating);
        assert!(err.source.is_configuration());
        assert!(!pipeline.staging_dir(&request).exists());
        assert!(fixture.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_executes_every_stage_again() {
        let fixture = Fixture::new(MockEngine::default());
        let pipeline = fixture.pipeline();
        let request = fixture.request();

        pipeline.run(&request).await.expect("first run");
        pipeline.run(&request).await.expect("second run");

        let calls = fixture.engine.calls();
        assert_eq!(calls.len(), 6);
        assert_eq!(calls[0], calls[3]);
        assert_eq!(calls[2], calls[5]);
    }

    #[tokio::test]
    async fn test_discard_policy_removes_staging() {
        let fixture = Fixture::new(MockEngine::default());
        let pipeline = fixture.pipeline().with_retain_policy(RetainPolicy::discard());
        let request = fixture.request();

        pipeline.run(&request).await.expect("pipeline should succeed");

        assert!(!pipeline.staging_dir(&request).exists());
    }

    #[test]
    fn test_retain_policy() {
        let policy = RetainPolicy {
            on_success: false,
            on_failure: true,
        };
        assert!(!policy.retains(true));
        assert!(policy.retains(false));
        assert!(RetainPolicy::default().retains(true));
    }
}
