// ABOUTME: Run configuration and its builder
// ABOUTME: Cumulative args and aliases, last-wins scalars, defaults and validation

use crate::container::{DEFAULT_COVERAGE_FILE, DEFAULT_SOCK_PATH};
use crate::error::{Result, RunnerError};
use crate::exec::DEFAULT_PATTERN;
use std::path::PathBuf;
use std::time::Duration;

/// Deadline for a whole run unless overridden
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Configuration for one containerized test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Go package (module root) to copy into the container
    pub package_path: PathBuf,
    /// `go test` package pattern
    pub pattern: String,
    /// Extra `go test` arguments, appended after the pattern
    pub args: Vec<String>,
    /// Hostnames for the container on its run network
    pub aliases: Vec<String>,
    /// Mount the host engine socket so tests can start sibling containers
    pub enable_var_sock: bool,
    pub sock_path: PathBuf,
    /// Deadline for the whole run. `Duration::ZERO` disables it.
    pub timeout: Duration,
    /// Recipe to build with instead of the built-in one
    pub dockerfile: Option<PathBuf>,
    /// Coverage profile path inside the container
    pub coverage_file: String,
}

impl Options {
    pub fn builder(package_path: impl Into<PathBuf>) -> OptionsBuilder {
        OptionsBuilder {
            options: Options {
                package_path: package_path.into(),
                pattern: DEFAULT_PATTERN.to_string(),
                args: Vec::new(),
                aliases: Vec::new(),
                enable_var_sock: false,
                sock_path: PathBuf::from(DEFAULT_SOCK_PATH),
                timeout: DEFAULT_TIMEOUT,
                dockerfile: None,
                coverage_file: DEFAULT_COVERAGE_FILE.to_string(),
            },
        }
    }

    /// Options for `package_path` with every default
    pub fn new(package_path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(package_path).build()
    }

    /// Check required fields and fill in defaults for blank ones.
    pub fn validate(mut self) -> Result<Self> {
        if self.package_path.as_os_str().is_empty() {
            return Err(RunnerError::InvalidOptions(
                "package path is required".to_string(),
            ));
        }
        if self.pattern.is_empty() {
            self.pattern = DEFAULT_PATTERN.to_string();
        }
        if self.sock_path.as_os_str().is_empty() {
            self.sock_path = PathBuf::from(DEFAULT_SOCK_PATH);
        }
        if self.coverage_file.is_empty() {
            self.coverage_file = DEFAULT_COVERAGE_FILE.to_string();
        }
        if self
            .dockerfile
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.dockerfile = None;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.options.pattern = pattern.into();
        self
    }

    /// Appends to any arguments already given
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.options.args.push(arg.into());
        self
    }

    /// Appends to any aliases already given
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options
            .aliases
            .extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn var_sock(mut self, enabled: bool) -> Self {
        self.options.enable_var_sock = enabled;
        self
    }

    pub fn sock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.sock_path = path.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.dockerfile = Some(path.into());
        self
    }

    pub fn coverage_file(mut self, path: impl Into<String>) -> Self {
        self.options.coverage_file = path.into();
        self
    }

    pub fn build(self) -> Result<Options> {
        self.options.validate()
    }
}
