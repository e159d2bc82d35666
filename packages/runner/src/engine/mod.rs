// ABOUTME: Container engine trait used by network and container sessions
// ABOUTME: Defines the narrow capability interface plus the handles and specs exchanged with it

use crate::archive::ContextArchive;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerEngine;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Image build error: {0}")]
    Build(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Container not ready: {0}")]
    NotReady(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Network created by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
}

/// Running container created by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    /// Image built for this container, removed together with it
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

/// Everything needed to build an image from a context and start one container from it
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub context: ContextArchive,
    /// Name of the recipe inside `context`
    pub dockerfile: String,
    pub network: Option<String>,
    /// Hostnames applied to the `network` binding only
    pub aliases: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<BindMount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamType,
    pub data: Bytes,
}

/// An attached command execution.
///
/// `output` yields demultiplexed chunks as the process writes them. `exit_code`
/// resolves once the process has finished and should be awaited after
/// `output` is drained.
pub struct ExecStream {
    pub output: BoxStream<'static, EngineResult<OutputChunk>>,
    pub exit_code: BoxFuture<'static, EngineResult<i64>>,
}

/// Container engine capabilities the runner depends on
#[async_trait]
pub trait Engine: Send + Sync {
    /// Create an isolated network with an engine-generated unique name
    async fn create_network(&self) -> EngineResult<NetworkHandle>;

    /// Delete a network; every attached container must already be gone
    async fn remove_network(&self, network: &NetworkHandle) -> EngineResult<()>;

    /// Build an image from the spec's context and start a container from it
    async fn build_and_start(&self, spec: ContainerSpec) -> EngineResult<ContainerHandle>;

    /// Run a command inside a running container
    async fn exec(&self, container: &ContainerHandle, argv: Vec<String>)
        -> EngineResult<ExecStream>;

    /// Read a file out of a container, `None` when it does not exist
    async fn copy_file_out(
        &self,
        container: &ContainerHandle,
        path: &str,
    ) -> EngineResult<Option<Vec<u8>>>;

    /// Stop and remove a container together with its image
    async fn stop_and_remove(&self, container: &ContainerHandle) -> EngineResult<()>;
}
