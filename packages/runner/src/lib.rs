// ABOUTME: Runs Go test suites inside throwaway Docker containers
// ABOUTME: Exposes the orchestrator plus the archive, network, container and engine building blocks

//! Each run gets its own network, an image built from the package tree, and
//! one container. `go test` runs with coverage enabled, its output streams to
//! the caller live, and everything is removed afterwards.
//!
//! ```no_run
//! use dockertest_runner::{run, Options};
//!
//! # async fn example() -> dockertest_runner::Result<()> {
//! let options = Options::builder("./mypackage")
//!     .aliases(["myapp.test"])
//!     .var_sock(true)
//!     .build()?;
//! let result = run(options).await?;
//! println!("exit code {}", result.exit_code);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod container;
pub mod engine;
pub mod error;
pub mod exec;
pub mod network;
pub mod options;
pub mod run;

pub use archive::{build_context, ContextArchive, DEFAULT_DOCKERFILE, DOCKERFILE_NAME};
pub use container::{
    CommandOutput, ContainerConfig, ContainerSession, OutputMode, CONTAINER_SOCK_PATH,
    DEFAULT_COVERAGE_FILE, DEFAULT_SOCK_PATH, NETWORK_ENV_VAR,
};
pub use engine::{DockerEngine, Engine, EngineError};
pub use error::{classify_phase_error, ArchiveError, Phase, Result, RunnerError};
pub use exec::{go_test_command, ExecConfig, ExecResult, DEFAULT_EXEC_TIMEOUT, DEFAULT_PATTERN};
pub use network::{NetworkRelease, NetworkSession};
pub use options::{Options, OptionsBuilder, DEFAULT_TIMEOUT};
pub use run::{run, RunResult, Runner};
