// ABOUTME: go test invocation inside a container session
// ABOUTME: Command construction plus a standalone test execution with its own timeout

use crate::container::{ContainerSession, OutputMode, DEFAULT_COVERAGE_FILE};
use crate::error::{Result, RunnerError};
use std::time::Duration;
use tracing::info;

/// Package pattern handed to `go test` when none is given
pub const DEFAULT_PATTERN: &str = "./...";

/// Upper bound for [`ContainerSession::exec_test`] when no timeout is set
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Parameters for a single `go test` run. Empty/zero fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecConfig {
    pub pattern: String,
    pub args: Vec<String>,
    pub coverage_file: String,
    pub timeout: Duration,
}

impl ExecConfig {
    fn with_defaults(mut self) -> Self {
        if self.pattern.is_empty() {
            self.pattern = DEFAULT_PATTERN.to_string();
        }
        if self.coverage_file.is_empty() {
            self.coverage_file = DEFAULT_COVERAGE_FILE.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_EXEC_TIMEOUT;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// stdout and stderr, interleaved
    pub stdout: Vec<u8>,
    pub exit_code: i64,
}

/// `go test -coverprofile=<coverage_file> <pattern> <args...>`
pub fn go_test_command(coverage_file: &str, pattern: &str, args: &[String]) -> Vec<String> {
    let mut argv = vec![
        "go".to_string(),
        "test".to_string(),
        format!("-coverprofile={}", coverage_file),
        pattern.to_string(),
    ];
    argv.extend(args.iter().cloned());
    argv
}

impl ContainerSession {
    /// Run `go test` and collect its output without forwarding it anywhere.
    ///
    /// Test failures show up as a non-zero `exit_code`, not as an error.
    pub async fn exec_test(&self, config: ExecConfig) -> Result<ExecResult> {
        if self.id().is_none() {
            return Err(RunnerError::NilContainer);
        }

        let config = config.with_defaults();
        let argv = go_test_command(&config.coverage_file, &config.pattern, &config.args);
        info!("Running {}", argv.join(" "));

        let mut sink = tokio::io::sink();
        let run = self.execute_command(argv, OutputMode::Combined, &mut sink);
        let output = tokio::time::timeout(config.timeout, run)
            .await
            .map_err(|_| RunnerError::ExecTimeout(config.timeout))??;

        Ok(ExecResult {
            stdout: output.output,
            exit_code: output.exit_code,
        })
    }
}
