//! Docker implementation of [`ContainerEngine`] using the bollard crate.

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{BuildInfo, CreateImageInfo};
use bollard::Docker;
use futures::StreamExt;
use uuid::Uuid;

use async_trait::async_trait;

use crate::engine::{
    ContainerEngine, ContainerExit, ContainerHandle, EngineEvent, EventStream, OutputSink,
};
use crate::error::EngineError;

/// Docker client wrapper implementing the pipeline's engine capability.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the local Docker daemon using bollard's defaults.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Unavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates an engine from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks that the daemon answers a ping.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Unavailable(format!("Ping failed: {e}")))?;
        Ok(())
    }

    async fn wait_exit_code(&self, id: &str) -> Result<i64, EngineError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(EngineError::Run {
                image: id.to_string(),
                message: format!("Error waiting for container: {e}"),
            }),
            None => Err(EngineError::MissingStatus { id: id.to_string() }),
        }
    }

    async fn stream_output(
        &self,
        id: &str,
        image: &str,
        output: &mut dyn OutputSink,
    ) -> Result<(), EngineError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(id, Some(options));
        let mut stdout = FrameDecoder::default();
        let mut stderr = FrameDecoder::default();

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    emit(output, stdout.push(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    emit(output, stderr.push(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(EngineError::Run {
                        image: image.to_string(),
                        message: format!("Error reading output: {e}"),
                    });
                }
            }
        }

        emit(output, stdout.finish());
        emit(output, stderr.finish());
        Ok(())
    }

    async fn start_and_collect(
        &self,
        id: &str,
        image: &str,
        output: &mut dyn OutputSink,
    ) -> Result<i64, EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::Run {
                image: image.to_string(),
                message: format!("Failed to start container: {e}"),
            })?;

        self.stream_output(id, image, output).await?;
        self.wait_exit_code(id).await
    }
}

fn emit(output: &mut dyn OutputSink, text: String) {
    if !text.is_empty() {
        output.write(&text);
    }
}

/// Turns log frames into text without splitting multi-byte characters.
///
/// The daemon frames output at arbitrary byte offsets; an incomplete UTF-8
/// sequence at the end of a frame is held back until the next one arrives.
#[derive(Debug, Default)]
struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    fn push(&mut self, frame: &[u8]) -> String {
        self.pending.extend_from_slice(frame);

        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        text
    }

    /// Flushes bytes still held back once the stream has ended.
    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

fn pull_event(info: CreateImageInfo) -> EngineEvent {
    EngineEvent {
        status: info.status,
        id: info.id,
        log_line: None,
        error: info.error,
    }
}

fn build_event(info: BuildInfo) -> EngineEvent {
    let error = info
        .error
        .or_else(|| info.error_detail.and_then(|detail| detail.message));
    EngineEvent {
        status: info.status,
        id: info.id,
        log_line: info.stream,
        error,
    }
}

/// Maps one item of a pull stream.
///
/// bollard turns a record carrying an `error` into `DockerStreamError`; a
/// pull has no embedded-error protocol, so that fails the pull with the
/// daemon's message.
fn pull_item(
    item: Result<CreateImageInfo, BollardError>,
    image: &str,
) -> Result<EngineEvent, EngineError> {
    match item {
        Ok(info) => Ok(pull_event(info)),
        Err(BollardError::DockerStreamError { error }) => Err(EngineError::Pull {
            image: image.to_string(),
            message: error,
        }),
        Err(e) => Err(EngineError::Pull {
            image: image.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Maps one item of a build stream.
///
/// A failed build step arrives as `DockerStreamError` in the middle of an
/// otherwise healthy stream. It becomes an error event so the caller keeps
/// draining and sees every error; only transport failures end the stream.
fn build_item(
    item: Result<BuildInfo, BollardError>,
    tag: &str,
) -> Result<EngineEvent, EngineError> {
    match item {
        Ok(info) => Ok(build_event(info)),
        Err(BollardError::DockerStreamError { error }) => Ok(EngineEvent::error(error)),
        Err(e) => Err(EngineError::Build {
            tag: tag.to_string(),
            message: e.to_string(),
        }),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull<'a>(&'a self, reference: &str) -> Result<EventStream<'a>, EngineError> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let image = reference.to_string();
        let stream = self
            .docker
            .create_image(Some(options), None, None)
            .map(move |item| pull_item(item, &image));

        Ok(stream.boxed())
    }

    async fn build_image<'a>(
        &'a self,
        context: Vec<u8>,
        tag: &str,
    ) -> Result<EventStream<'a>, EngineError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let tag = tag.to_string();
        let stream = self
            .docker
            .build_image(options, None, Some(context.into()))
            .map(move |item| build_item(item, &tag));

        Ok(stream.boxed())
    }

    async fn run(
        &self,
        image: &str,
        command: &[String],
        output: &mut dyn OutputSink,
    ) -> Result<ContainerExit, EngineError> {
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(command.to_vec()),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let name = format!("autochecker-{}", Uuid::new_v4());
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| EngineError::Run {
                image: image.to_string(),
                message: format!("Failed to create container: {e}"),
            })?;
        let container = ContainerHandle(response.id);

        match self.start_and_collect(&container.0, image, output).await {
            Ok(exit_code) => Ok(ContainerExit {
                exit_code,
                container,
            }),
            Err(e) => {
                if let Err(remove_err) = self.remove(&container).await {
                    tracing::warn!(container = %container, error = %remove_err, "Failed to remove container after run error");
                }
                Err(e)
            }
        }
    }

    async fn remove(&self, container: &ContainerHandle) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(&container.0, Some(options))
            .await
            .map_err(|e| EngineError::Remove {
                id: container.0.clone(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}
