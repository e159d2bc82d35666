// ABOUTME: Error types for containerized test runs
// ABOUTME: Phase-tagged wrapping, timeout reclassification, and archive/engine failure variants

use crate::engine::EngineError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Orchestration step a run was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CreateNetwork,
    CreateContainer,
    ExecuteTests,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::CreateNetwork => "create network",
            Phase::CreateContainer => "create container",
            Phase::ExecuteTests => "execute tests",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures while snapshotting a package tree into a build context
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read context directory {}: {source}", path.display())]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read custom Dockerfile at {}: {source}", path.display())]
    UnreadableDockerfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk context directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to add {} to build context: {source}", path.display())]
    Entry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {what}: {source}")]
    Write {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("build context task did not complete: {0}")]
    Interrupted(String),
}

/// Main error type for runner operations
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Options failed validation; nothing was allocated
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("package path does not exist: {}", .0.display())]
    PackageNotFound(PathBuf),

    #[error("failed to resolve package path {}: {source}", path.display())]
    PackagePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create tar context: {0}")]
    Archive(#[from] ArchiveError),

    #[error("failed to connect to docker: {0}")]
    Connect(#[source] EngineError),

    #[error("failed to create docker network: {0}")]
    NetworkCreate(#[source] EngineError),

    #[error("failed to remove docker network: {0}")]
    NetworkRemove(#[source] EngineError),

    #[error("failed to apply network option: {0}")]
    NetworkOption(String),

    #[error("failed to apply host config option: {0}")]
    HostConfig(String),

    #[error("failed to create container: {0}")]
    ContainerCreate(#[source] EngineError),

    #[error("failed to terminate container: {0}")]
    ContainerTerminate(#[source] EngineError),

    /// The session has no running container behind it
    #[error("container is nil")]
    NilContainer,

    #[error("failed to execute test command: {0}")]
    Exec(#[source] EngineError),

    #[error("failed to read test output: {0}")]
    ReadOutput(#[source] EngineError),

    #[error("failed to forward test output: {0}")]
    ForwardOutput(#[source] std::io::Error),

    #[error("failed to read file content: {0}")]
    CopyFile(#[source] EngineError),

    #[error("test execution timed out after {0:?}")]
    ExecTimeout(Duration),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// A spawned step was cancelled before it produced a result
    #[error("step did not complete: {0}")]
    Interrupted(String),

    #[error("failed to {phase}: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<RunnerError>,
    },

    #[error("timeout during {phase}: {source}")]
    Timeout {
        phase: Phase,
        #[source]
        source: Box<RunnerError>,
    },
}

impl RunnerError {
    /// The wrapped error of a phase or timeout failure.
    pub fn cause(&self) -> Option<&RunnerError> {
        match self {
            RunnerError::Phase { source, .. } | RunnerError::Timeout { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Whether the run's deadline had elapsed when this error surfaced.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout { .. })
    }

    /// Phase named by a wrapped error.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            RunnerError::Phase { phase, .. } | RunnerError::Timeout { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Tag a failed operation with its phase.
///
/// Errors that surface after the governing deadline elapsed become
/// `Timeout`, everything else becomes `Phase`. The original error stays
/// reachable through `cause()` and `source()` either way.
pub fn classify_phase_error(err: RunnerError, phase: Phase, deadline_expired: bool) -> RunnerError {
    let source = Box::new(err);
    if deadline_expired {
        RunnerError::Timeout { phase, source }
    } else {
        RunnerError::Phase { phase, source }
    }
}

/// Type alias for Results that return RunnerError
pub type Result<T> = std::result::Result<T, RunnerError>;
