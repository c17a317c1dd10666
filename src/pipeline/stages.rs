//! The engine-facing pipeline stages: pull, build and run.

use std::io;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{Stream, StreamExt};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use crate::engine::{ContainerEngine, EngineEvent, OutputSink};
use crate::error::{EngineError, StageError};

use super::sink::ProgressSink;

/// Pull phases emitted once per layer per progress tick; never echoed.
const NOISY_PULL_PHASES: &[&str] = &["Downloading", "Extracting"];

/// Shared per-invocation context handed to every stage.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub sink: &'a dyn ProgressSink,
    pub version: &'a str,
    pub verbose: bool,
}

impl StageContext<'_> {
    /// Forwards `line` to the sink when running verbose.
    fn echo(&self, line: &str) {
        if self.verbose {
            self.sink.line(self.version, line);
        }
    }
}

/// Pulls `base_image:version` and drains the progress stream.
pub async fn pull_base_image(ctx: &StageContext<'_>, base_image: &str) -> Result<(), StageError> {
    let reference = format!("{base_image}:{}", ctx.version);
    tracing::debug!(version = ctx.version, image = %reference, "Pulling base image");

    let mut stream = ctx.engine.pull(&reference).await?;

    while let Some(event) = stream.next().await {
        let event = event?;
        if let Some(line) = pull_status_line(&event) {
            ctx.echo(&line);
        }
    }

    Ok(())
}

/// Status text worth showing for a pull event, if any.
fn pull_status_line(event: &EngineEvent) -> Option<String> {
    let status = event.status.as_deref()?;
    if NOISY_PULL_PHASES.contains(&status) {
        return None;
    }
    Some(match event.id.as_deref() {
        Some(id) => format!("{id}: {status}"),
        None => status.to_string(),
    })
}

/// Packs `staging` into a build context, builds it as `image_name` and
/// checks the event stream for embedded build errors.
pub async fn build_image(
    ctx: &StageContext<'_>,
    staging: &Path,
    image_name: &str,
) -> Result<(), StageError> {
    match tokio::fs::try_exists(staging).await {
        Ok(true) => {}
        Ok(false) => return Err(StageError::NotFound(staging.to_path_buf())),
        Err(e) => return Err(StageError::io(staging, e)),
    }

    let context = pack_context(staging).await?;
    tracing::debug!(version = ctx.version, image = image_name, bytes = context.len(), "Submitting build context");

    let stream = ctx.engine.build_image(context, image_name).await?;
    scan_build_events(stream, |line| ctx.echo(line)).await
}

/// Drains a build stream, forwarding log lines to `on_line`.
///
/// The daemon reports a failed build step as an `error` record inside a
/// stream that still terminates normally, so every record is inspected and
/// the last embedded error (if any) fails the build.
pub async fn scan_build_events<S, F>(mut stream: S, mut on_line: F) -> Result<(), StageError>
where
    S: Stream<Item = Result<EngineEvent, EngineError>> + Unpin,
    F: FnMut(&str),
{
    let mut last_error = None;

    while let Some(event) = stream.next().await {
        let event = event?;
        if let Some(log) = event.log_line.as_deref() {
            for line in log.lines().filter(|l| !l.trim().is_empty()) {
                on_line(line);
            }
        }
        if let Some(error) = event.error {
            last_error = Some(error);
        }
    }

    match last_error {
        Some(message) => Err(StageError::Build(message)),
        None => Ok(()),
    }
}

/// Gzipped tar of the whole staging tree, entries in file-name order.
async fn pack_context(staging: &Path) -> Result<Vec<u8>, StageError> {
    let root = staging.to_path_buf();
    let target = root.clone();

    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, StageError> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = TarBuilder::new(encoder);
        tar.follow_symlinks(false);

        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| StageError::io(&root, e.into()))?;
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            if entry.file_type().is_dir() {
                tar.append_dir(relative, entry.path())
                    .map_err(|e| StageError::io(entry.path(), e))?;
            } else {
                tar.append_path_with_name(entry.path(), relative)
                    .map_err(|e| StageError::io(entry.path(), e))?;
            }
        }

        let encoder = tar.into_inner().map_err(|e| StageError::io(&root, e))?;
        encoder.finish().map_err(|e| StageError::io(&root, e))
    })
    .await
    .map_err(|e| StageError::io(target, io::Error::other(e)))?
}

/// Verdict of the test container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
    pub exit_code: i64,
    pub output: String,
}

/// Collects container output and, optionally, echoes complete lines live.
pub struct OutputCollector<'a> {
    captured: String,
    pending: String,
    echo: Option<(&'a dyn ProgressSink, &'a str)>,
}

impl<'a> OutputCollector<'a> {
    /// Creates a collector; `echo` receives every non-empty line as it completes.
    pub fn new(echo: Option<(&'a dyn ProgressSink, &'a str)>) -> Self {
        Self {
            captured: String::new(),
            pending: String::new(),
            echo,
        }
    }

    /// Flushes any unterminated line and returns everything captured.
    pub fn finish(mut self) -> String {
        if let Some((sink, version)) = self.echo {
            let rest = std::mem::take(&mut self.pending);
            if !rest.trim().is_empty() {
                sink.line(version, rest.trim_end_matches('\r'));
            }
        }
        self.captured
    }
}

impl OutputSink for OutputCollector<'_> {
    fn write(&mut self, chunk: &str) {
        self.captured.push_str(chunk);

        let Some((sink, version)) = self.echo else {
            return;
        };
        self.pending.push_str(chunk);
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.trim().is_empty() {
                sink.line(version, line);
            }
        }
    }
}

/// Runs `command` in a container from `image_name` and removes the container.
pub async fn run_tests(
    ctx: &StageContext<'_>,
    image_name: &str,
    command: &[String],
) -> Result<RunOutcome, StageError> {
    let mut collector = OutputCollector::new(ctx.verbose.then_some((ctx.sink, ctx.version)));

    let exit = ctx.engine.run(image_name, command, &mut collector).await?;

    if let Err(e) = ctx.engine.remove(&exit.container).await {
        tracing::warn!(version = ctx.version, container = %exit.container, error = %e, "Failed to remove test container");
    }

    Ok(RunOutcome {
        success: exit.exit_code == 0,
        exit_code: exit.exit_code,
        output: collector.finish(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::pipeline::sink::recording::RecordingSink;
    use futures::stream;

    fn ctx<'a>(engine: &'a MockEngine, sink: &'a RecordingSink, verbose: bool) -> StageContext<'a> {
        StageContext {
            engine,
            sink,
            version: "myversion",
            verbose,
        }
    }

    #[tokio::test]
    async fn test_pull_requests_versioned_reference() {
        let engine = MockEngine::default();
        let sink = RecordingSink::default();

        pull_base_image(&ctx(&engine, &sink, false), "small/image")
            .await
            .expect("pull should succeed");

        assert_eq!(engine.calls(), vec!["pull small/image:myversion"]);
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure_is_engine_error() {
        let engine = MockEngine {
            fail_pull: true,
            ..Default::default()
        };
        let sink = RecordingSink::default();

        let err = pull_base_image(&ctx(&engine, &sink, false), "small/image")
            .await
            .expect_err("pull should fail");

        assert!(matches!(err, StageError::Engine(EngineError::Pull { .. })));
        assert!(err.to_string().contains("Something went wrong"));
    }

    #[tokio::test]
    async fn test_verbose_pull_skips_noisy_phases() {
        let engine = MockEngine {
            pull_events: vec![
                EngineEvent::status("Pulling from small/image"),
                EngineEvent::status("Downloading"),
                EngineEvent::status("Extracting"),
                EngineEvent::status("Downloading"),
                EngineEvent {
                    id: Some("a1b2".to_string()),
                    ..EngineEvent::status("Pull complete")
                },
            ],
            ..Default::default()
        };
        let sink = RecordingSink::default();

        pull_base_image(&ctx(&engine, &sink, true), "small/image")
            .await
            .expect("pull should succeed");

        assert_eq!(
            sink.lines(),
            vec!["Pulling from small/image", "a1b2: Pull complete"]
        );
    }

    #[tokio::test]
    async fn test_scan_detects_embedded_error() {
        let events = stream::iter(vec![
            Ok(EngineEvent::log("Step 1/2 : FROM x:1\n")),
            Ok(EngineEvent::log("Step 2/2 : COPPY . .\n")),
            Ok(EngineEvent::error("boom")),
        ]);

        let err = scan_build_events(events, |_| {})
            .await
            .expect_err("embedded error must fail the build");

        assert!(matches!(err, StageError::Build(ref m) if m == "boom"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_scan_reports_last_error() {
        let events = stream::iter(vec![
            Ok(EngineEvent::error("first")),
            Ok(EngineEvent::log("more output\n")),
            Ok(EngineEvent::error("second")),
        ]);

        let err = scan_build_events(events, |_| {}).await.unwrap_err();
        assert!(matches!(err, StageError::Build(ref m) if m == "second"));
    }

    #[tokio::test]
    async fn test_scan_forwards_lines_in_order() {
        let events = stream::iter(vec![
            Ok(EngineEvent::log("Step 1/2 : FROM x:1\n")),
            Ok(EngineEvent::log(" ---> abc\nStep 2/2 : COPY . .\n")),
            Ok(EngineEvent::log("\n")),
        ]);
        let mut lines = Vec::new();

        scan_build_events(events, |l| lines.push(l.to_string()))
            .await
            .expect("clean build");

        assert_eq!(
            lines,
            vec!["Step 1/2 : FROM x:1", " ---> abc", "Step 2/2 : COPY . ."]
        );
    }

    #[tokio::test]
    async fn test_scan_transport_error_is_engine_error() {
        let events = stream::iter(vec![
            Ok(EngineEvent::log("Step 1/2\n")),
            Err(EngineError::Build {
                tag: "my/image".to_string(),
                message: "connection reset".to_string(),
            }),
        ]);

        let err = scan_build_events(events, |_| {}).await.unwrap_err();
        assert!(matches!(err, StageError::Engine(EngineError::Build { .. })));
    }

    #[tokio::test]
    async fn test_build_missing_staging_is_not_found() {
        let engine = MockEngine::default();
        let sink = RecordingSink::default();

        let err = build_image(
            &ctx(&engine, &sink, false),
            Path::new("/somemadeuppath/"),
            "my/image",
        )
        .await
        .expect_err("missing directory must fail");

        assert!(matches!(err, StageError::NotFound(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_build_unreadable_staging_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("plain-file");
        std::fs::write(&file, "not a directory").unwrap();
        let engine = MockEngine::default();
        let sink = RecordingSink::default();

        let err = build_image(&ctx(&engine, &sink, false), &file.join("staging"), "my/image")
            .await
            .expect_err("lookup through a file must fail");

        assert!(matches!(err, StageError::Io { .. }));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_build_sends_gzipped_tar_of_staging() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Dockerfile"), "FROM x:1\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.js"), "1").unwrap();
        let engine = MockEngine::default();
        let sink = RecordingSink::default();

        build_image(&ctx(&engine, &sink, false), dir.path(), "my/image")
            .await
            .expect("build should succeed");

        let contexts = engine.built_contexts.lock().unwrap();
        let decoder = flate2::read::GzDecoder::new(contexts[0].as_slice());
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n == "Dockerfile"));
        assert!(names.iter().any(|n| n == "src/app.js"));
    }

    #[tokio::test]
    async fn test_build_embedded_error_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = MockEngine {
            build_events: vec![
                EngineEvent::log("Step 1/1 : COPPY\n"),
                EngineEvent::error("boom"),
            ],
            ..Default::default()
        };
        let sink = RecordingSink::default();

        let err = build_image(&ctx(&engine, &sink, true), dir.path(), "my/image")
            .await
            .expect_err("embedded error must fail");

        assert!(matches!(err, StageError::Build(ref m) if m.contains("boom")));
        assert_eq!(sink.lines(), vec!["Step 1/1 : COPPY"]);
    }

    #[tokio::test]
    async fn test_run_success_verdict() {
        let engine = MockEngine {
            output_chunks: vec!["hello ".to_string(), "world\n".to_string()],
            exit_code: Some(0),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let command = vec!["whoami".to_string()];

        let outcome = run_tests(&ctx(&engine, &sink, false), "my/image", &command)
            .await
            .expect("run should succeed");

        assert!(outcome.success);
        assert_eq!(outcome.output, "hello world\n");
        assert_eq!(engine.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_failure_verdict_still_captures_output() {
        let engine = MockEngine {
            output_chunks: vec!["1 failing\n".to_string(), "exit".to_string()],
            exit_code: Some(123),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let command = vec!["npm".to_string(), "test".to_string()];

        let outcome = run_tests(&ctx(&engine, &sink, false), "my/image", &command)
            .await
            .expect("run should complete");

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 123);
        assert_eq!(outcome.output, "1 failing\nexit");
        assert_eq!(engine.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_verbose_echoes_lines() {
        let engine = MockEngine {
            output_chunks: vec!["a\n\nb".to_string(), "c\n".to_string(), "tail".to_string()],
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let command = vec!["whoami".to_string()];

        let outcome = run_tests(&ctx(&engine, &sink, true), "my/image", &command)
            .await
            .unwrap();

        assert_eq!(outcome.output, "a\n\nbc\ntail");
        assert_eq!(sink.lines(), vec!["a", "bc", "tail"]);
    }

    #[tokio::test]
    async fn test_run_without_status_is_engine_error() {
        let engine = MockEngine {
            exit_code: None,
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let command = vec!["whoami".to_string()];

        let err = run_tests(&ctx(&engine, &sink, false), "my/image", &command)
            .await
            .expect_err("missing status must fail");

        assert!(matches!(err, StageError::Engine(EngineError::MissingStatus { .. })));
    }
}
