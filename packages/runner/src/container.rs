// ABOUTME: Container session lifecycle for a package under test
// ABOUTME: Builds the image from the package tree, waits for readiness, runs commands and copies files out

use crate::archive::{build_context, DOCKERFILE_NAME};
use crate::engine::{
    BindMount, ContainerHandle, ContainerSpec, Engine, EngineError, EngineResult, ExecStream,
    StreamType,
};
use crate::error::{ArchiveError, Result, RunnerError};
use crate::network::NetworkSession;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Host engine socket mounted when the socket mount is enabled without a path
pub const DEFAULT_SOCK_PATH: &str = "/var/run/docker.sock";

/// Where the host socket appears inside the container
pub const CONTAINER_SOCK_PATH: &str = "/var/run/docker.sock";

/// Set to the attached network's name so nested containers can join it
pub const NETWORK_ENV_VAR: &str = "TESTCONTAINERS_DOCKER_NETWORK";

/// Coverage profile location written by the test command
pub const DEFAULT_COVERAGE_FILE: &str = "/tmp/coverage.txt";

const READY_COMMAND: [&str; 2] = ["echo", "ready"];
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Which of the command's streams are captured and forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stdout and stderr interleaved in the order they were written
    #[default]
    Combined,
    StdoutOnly,
}

/// What to build and how to wire it up
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub package_path: PathBuf,
    /// Name of the network to attach to
    pub network: Option<String>,
    /// Hostnames on `network`
    pub aliases: Vec<String>,
    /// Bind-mount the host engine socket into the container
    pub enable_var_sock: bool,
    pub sock_path: Option<PathBuf>,
    /// Recipe replacing the built-in one, absolute or relative to `package_path`
    pub dockerfile: Option<PathBuf>,
    pub ready_timeout: Duration,
}

impl ContainerConfig {
    pub fn new(package_path: impl Into<PathBuf>) -> Self {
        Self {
            package_path: package_path.into(),
            network: None,
            aliases: Vec::new(),
            enable_var_sock: false,
            sock_path: None,
            dockerfile: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_network(mut self, network: &NetworkSession) -> Self {
        self.network = Some(network.name().to_string());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_docker_socket(mut self, enabled: bool) -> Self {
        self.enable_var_sock = enabled;
        self
    }

    pub fn with_sock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sock_path = Some(path.into());
        self
    }

    pub fn with_dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(path.into());
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn network_binding(&self) -> Result<(Option<String>, Vec<String>)> {
        match (&self.network, self.aliases.is_empty()) {
            (None, false) => Err(RunnerError::NetworkOption(format!(
                "aliases {:?} require an attached network",
                self.aliases
            ))),
            (network, _) => Ok((network.clone(), self.aliases.clone())),
        }
    }

    fn socket_mount(&self) -> Result<Option<BindMount>> {
        if !self.enable_var_sock {
            return Ok(None);
        }

        let source = self
            .sock_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(DEFAULT_SOCK_PATH));
        if !source.is_absolute() {
            return Err(RunnerError::HostConfig(format!(
                "socket path must be absolute: {}",
                source.display()
            )));
        }

        Ok(Some(BindMount {
            source: source.display().to_string(),
            target: CONTAINER_SOCK_PATH.to_string(),
        }))
    }
}

/// Output and exit status of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    pub exit_code: i64,
}

/// A running container owned by one caller.
///
/// Commands must not be executed concurrently on the same session.
pub struct ContainerSession {
    engine: Arc<dyn Engine>,
    handle: Option<ContainerHandle>,
    ready_timeout: Duration,
}

impl ContainerSession {
    /// Build the package image, start it and wait until it accepts commands.
    ///
    /// A container that never becomes ready is torn down before the error
    /// is returned.
    pub async fn create(engine: Arc<dyn Engine>, config: ContainerConfig) -> Result<Self> {
        let mut session = Self::start(engine, config).await?;

        if let Err(e) = session.wait_until_ready().await {
            warn!("Container never became ready, tearing it down: {}", e);
            if let Err(teardown) = session.terminate().await {
                warn!("Failed to clean up unready container: {}", teardown);
            }
            return Err(e);
        }

        Ok(session)
    }

    /// Build the package image and start it without waiting for readiness.
    ///
    /// The caller owns the running container from here on and must
    /// [`terminate`](Self::terminate) it.
    pub async fn start(engine: Arc<dyn Engine>, config: ContainerConfig) -> Result<Self> {
        let package_path =
            std::path::absolute(&config.package_path).map_err(|source| RunnerError::PackagePath {
                path: config.package_path.clone(),
                source,
            })?;

        match tokio::fs::metadata(&package_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RunnerError::PackageNotFound(package_path));
            }
            Err(source) => {
                return Err(RunnerError::PackagePath {
                    path: package_path,
                    source,
                })
            }
        }

        let (network, aliases) = config.network_binding()?;
        let mounts: Vec<BindMount> = config.socket_mount()?.into_iter().collect();

        let root = package_path.clone();
        let dockerfile = config.dockerfile.clone();
        let context = tokio::task::spawn_blocking(move || build_context(&root, dockerfile.as_deref()))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
                ArchiveError::Interrupted(e.to_string())
            })??;

        let mut env = BTreeMap::new();
        if let Some(name) = &network {
            env.insert(NETWORK_ENV_VAR.to_string(), name.clone());
        }

        let spec = ContainerSpec {
            context,
            dockerfile: DOCKERFILE_NAME.to_string(),
            network,
            aliases,
            env,
            mounts,
        };

        info!("Building test container for {}", package_path.display());
        let handle = engine
            .build_and_start(spec)
            .await
            .map_err(RunnerError::ContainerCreate)?;

        info!("Started container {}", handle.id);
        Ok(Self {
            engine,
            handle: Some(handle),
            ready_timeout: config.ready_timeout,
        })
    }

    #[cfg(test)]
    pub(crate) fn attached(engine: Arc<dyn Engine>, handle: ContainerHandle) -> Self {
        Self {
            engine,
            handle: Some(handle),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Engine id of the running container, `None` once terminated
    pub fn id(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.id.as_str())
    }

    /// Retry the readiness probe until it succeeds or the ready timeout runs out.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let timeout = self.ready_timeout;
        let give_up = Instant::now().checked_add(timeout);
        loop {
            let attempt = match give_up {
                Some(at) => {
                    // Each probe gets at least one poll interval, even on a spent budget
                    let bound = at.max(Instant::now() + READY_POLL_INTERVAL);
                    tokio::time::timeout_at(bound, self.probe())
                        .await
                        .unwrap_or_else(|_| {
                            Err(EngineError::NotReady("probe did not finish".to_string()))
                        })
                }
                None => self.probe().await,
            };

            match attempt {
                Ok(()) => {
                    info!("Container {} ready", self.id().unwrap_or_default());
                    return Ok(());
                }
                Err(e) if give_up.is_some_and(|at| Instant::now() >= at) => {
                    return Err(RunnerError::ContainerCreate(EngineError::NotReady(format!(
                        "`{}` did not succeed within {:?}: {}",
                        READY_COMMAND.join(" "),
                        timeout,
                        e
                    ))));
                }
                Err(e) => debug!("Readiness probe failed, retrying: {}", e),
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn probe(&self) -> EngineResult<()> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| EngineError::ContainerError("no container to probe".to_string()))?;
        let argv = READY_COMMAND.iter().map(|s| s.to_string()).collect();

        let ExecStream { mut output, exit_code } = self.engine.exec(handle, argv).await?;
        while let Some(chunk) = output.next().await {
            chunk?;
        }

        match exit_code.await? {
            0 => Ok(()),
            code => Err(EngineError::NotReady(format!("probe exited with code {}", code))),
        }
    }

    /// Stop and remove the container. Safe to call more than once.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(());
        };

        self.engine
            .stop_and_remove(handle)
            .await
            .map_err(RunnerError::ContainerTerminate)?;
        info!("Terminated container {}", handle.id);

        self.handle = None;
        Ok(())
    }

    /// Run `argv` in the container, copying output to `forward` as it arrives.
    ///
    /// The returned output holds the same bytes that were forwarded. A
    /// non-zero exit code is reported, not treated as an error.
    pub async fn execute_command<W>(
        &self,
        argv: Vec<String>,
        mode: OutputMode,
        forward: &mut W,
    ) -> Result<CommandOutput>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let handle = self.handle.as_ref().ok_or(RunnerError::NilContainer)?;

        debug!("Executing in {}: {:?}", handle.id, argv);
        let ExecStream { mut output, exit_code } = self
            .engine
            .exec(handle, argv)
            .await
            .map_err(RunnerError::Exec)?;

        let mut buffer = Vec::new();
        while let Some(chunk) = output.next().await {
            let chunk = chunk.map_err(RunnerError::ReadOutput)?;
            if mode == OutputMode::StdoutOnly && chunk.stream == StreamType::Stderr {
                continue;
            }
            forward
                .write_all(&chunk.data)
                .await
                .map_err(RunnerError::ForwardOutput)?;
            buffer.extend_from_slice(&chunk.data);
        }
        forward.flush().await.map_err(RunnerError::ForwardOutput)?;

        let exit_code = exit_code.await.map_err(RunnerError::Exec)?;
        debug!("Command in {} exited with {}", handle.id, exit_code);

        Ok(CommandOutput {
            output: buffer,
            exit_code,
        })
    }

    /// Read a file out of the container.
    ///
    /// `Ok(None)` means the file does not exist; an existing empty file is
    /// `Ok(Some(vec![]))`.
    pub async fn copy_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let handle = self.handle.as_ref().ok_or(RunnerError::NilContainer)?;

        let content = self
            .engine
            .copy_file_out(handle, path)
            .await
            .map_err(RunnerError::CopyFile)?;
        if content.is_none() {
            debug!("{} not present in container {}", path, handle.id);
        }
        Ok(content)
    }

    /// Coverage profile at [`DEFAULT_COVERAGE_FILE`]
    pub async fn copy_coverage(&self) -> Result<Option<Vec<u8>>> {
        self.copy_file(DEFAULT_COVERAGE_FILE).await
    }

    /// Coverage profile at `path`, or the default location when `path` is empty
    pub async fn copy_coverage_from(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if path.is_empty() {
            self.copy_coverage().await
        } else {
            self.copy_file(path).await
        }
    }
}

impl std::fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("handle", &self.handle)
            .finish()
    }
}
