// ABOUTME: Docker engine implementation backed by the bollard client
// ABOUTME: Builds per-run images, manages networks and containers, streams exec output and copies files out

use super::{
    BindMount, ContainerHandle, ContainerSpec, Engine, EngineError, EngineResult, ExecStream,
    NetworkHandle, OutputChunk, StreamType,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
        NetworkingConfig, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::{BuildImageOptions, RemoveImageOptions},
    models::{EndpointSettings, HostConfig, Mount, MountTypeEnum},
    network::CreateNetworkOptions,
    Docker,
};
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const LABEL_PREFIX: &str = "dockertest";

/// Seconds a container gets to exit on SIGTERM before it is killed
const STOP_TIMEOUT_SECS: i64 = 5;

const EXEC_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXEC_EXIT_POLL_ATTEMPTS: usize = 200;

/// Engine talking to a Docker daemon
#[derive(Clone)]
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform default socket and check the daemon answers.
    pub async fn connect() -> EngineResult<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| EngineError::ConnectionError(e.to_string()))?;

        client.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            EngineError::ConnectionError(e.to_string())
        })?;

        info!("Connected to Docker daemon");
        Ok(Self::with_client(client))
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    fn unique_name() -> String {
        format!("{}-{}", LABEL_PREFIX, Uuid::new_v4().simple())
    }

    fn labels() -> HashMap<String, String> {
        HashMap::from([(format!("{}.managed", LABEL_PREFIX), "true".to_string())])
    }

    async fn build_image(&self, spec: &ContainerSpec, tag: &str) -> EngineResult<()> {
        let options = BuildImageOptions {
            dockerfile: spec.dockerfile.clone(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            labels: Self::labels(),
            ..Default::default()
        };

        let mut stream = Box::pin(self.client.build_image(
            options,
            None,
            Some(spec.context.clone().into_bytes()),
        ));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| EngineError::Build(e.to_string()))?;
            if let Some(message) = info.error {
                return Err(EngineError::Build(message));
            }
            if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                if !line.is_empty() {
                    debug!("build {}: {}", tag, line);
                }
            }
        }

        Ok(())
    }

    async fn remove_image(&self, image: &str) -> EngineResult<()> {
        let options = RemoveImageOptions {
            force: true,
            noprune: false,
        };
        match self.client.remove_image(image, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, id: &str) -> EngineResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.client.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of a half-built container and its image
    async fn discard(&self, container_id: Option<&str>, image: &str) {
        if let Some(id) = container_id {
            if let Err(e) = self.remove_container(id).await {
                warn!("Failed to remove container {}: {}", id, e);
            }
        }
        if let Err(e) = self.remove_image(image).await {
            warn!("Failed to remove image {}: {}", image, e);
        }
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn create_network(&self) -> EngineResult<NetworkHandle> {
        let name = Self::unique_name();
        let options = CreateNetworkOptions {
            name: name.clone(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            labels: Self::labels(),
            ..Default::default()
        };

        self.client.create_network(options).await?;
        debug!("Created network {}", name);

        Ok(NetworkHandle {
            id: name.clone(),
            name,
        })
    }

    async fn remove_network(&self, network: &NetworkHandle) -> EngineResult<()> {
        self.client.remove_network(&network.id).await?;
        Ok(())
    }

    async fn build_and_start(&self, spec: ContainerSpec) -> EngineResult<ContainerHandle> {
        let name = Self::unique_name();
        let image = format!("{}:latest", name);

        info!("Building image {} ({} byte context)", image, spec.context.len());
        if let Err(e) = self.build_image(&spec, &image).await {
            self.discard(None, &image).await;
            return Err(e);
        }

        let config = container_config(&image, &spec);
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let container = match self.client.create_container(Some(options), config).await {
            Ok(container) => container,
            Err(e) => {
                self.discard(None, &image).await;
                return Err(EngineError::ContainerError(e.to_string()));
            }
        };
        for warning in &container.warnings {
            warn!("Container {}: {}", container.id, warning);
        }

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(Some(&container.id), &image).await;
            return Err(EngineError::ContainerError(e.to_string()));
        }

        debug!("Started container {} from {}", container.id, image);
        Ok(ContainerHandle {
            id: container.id,
            image: Some(image),
        })
    }

    async fn exec(
        &self,
        container: &ContainerHandle,
        argv: Vec<String>,
    ) -> EngineResult<ExecStream> {
        let options = CreateExecOptions {
            cmd: Some(argv),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(&container.id, options).await?;

        let output = match self
            .client
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(EngineError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        };

        let output = output
            .filter_map(|msg| async move {
                match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk {
                            stream: StreamType::Stdout,
                            data: message,
                        }))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk {
                        stream: StreamType::Stderr,
                        data: message,
                    })),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(EngineError::from(e))),
                }
            })
            .boxed();

        let client = self.client.clone();
        let exec_id = exec.id;
        let exit_code = async move { wait_for_exit(&client, &exec_id).await }.boxed();

        Ok(ExecStream { output, exit_code })
    }

    async fn copy_file_out(
        &self,
        container: &ContainerHandle,
        path: &str,
    ) -> EngineResult<Option<Vec<u8>>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = Box::pin(
            self.client
                .download_from_container(&container.id, Some(options)),
        );

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) if is_status(&e, 404) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        read_single_file(&data).map(Some)
    }

    async fn stop_and_remove(&self, container: &ContainerHandle) -> EngineResult<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.client.stop_container(&container.id, Some(options)).await {
            Ok(()) => {}
            Err(e) if is_status(&e, 304) || is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        self.remove_container(&container.id).await?;
        if let Some(image) = &container.image {
            self.remove_image(image).await?;
        }

        debug!("Removed container {}", container.id);
        Ok(())
    }
}

/// Creation config for a container running `image` as described by `spec`
fn container_config(image: &str, spec: &ContainerSpec) -> Config<String> {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mounts: Vec<Mount> = spec.mounts.iter().map(bind_mount).collect();

    let host_config = HostConfig {
        mounts: (!mounts.is_empty()).then_some(mounts),
        network_mode: spec.network.clone(),
        ..Default::default()
    };

    let networking_config = spec.network.as_ref().map(|network| NetworkingConfig {
        endpoints_config: HashMap::from([(
            network.clone(),
            EndpointSettings {
                aliases: (!spec.aliases.is_empty()).then(|| spec.aliases.clone()),
                ..Default::default()
            },
        )]),
    });

    Config {
        image: Some(image.to_string()),
        env: Some(env),
        labels: Some(DockerEngine::labels()),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn bind_mount(mount: &BindMount) -> Mount {
    Mount {
        source: Some(mount.source.clone()),
        target: Some(mount.target.clone()),
        typ: Some(MountTypeEnum::BIND),
        ..Default::default()
    }
}

async fn wait_for_exit(client: &Docker, exec_id: &str) -> EngineResult<i64> {
    for _ in 0..EXEC_EXIT_POLL_ATTEMPTS {
        let inspect = client.inspect_exec(exec_id).await?;
        if inspect.running != Some(true) {
            return inspect.exit_code.ok_or_else(|| {
                EngineError::ContainerError(format!("exec {} finished without an exit code", exec_id))
            });
        }
        tokio::time::sleep(EXEC_EXIT_POLL_INTERVAL).await;
    }

    Err(EngineError::ContainerError(format!(
        "exec {} still running after its output closed",
        exec_id
    )))
}

/// Contents of the one regular file in a tar stream from the daemon's archive endpoint
fn read_single_file(tar: &[u8]) -> EngineResult<Vec<u8>> {
    let mut archive = tar::Archive::new(tar);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }

    Err(EngineError::ContainerError(
        "copied path is not a regular file".to_string(),
    ))
}

fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}
