// ABOUTME: dockertest command-line entry point
// ABOUTME: Runs a Go package's tests in a throwaway container, saves coverage and exits with the test status

use clap::Parser;
use colored::*;
use dockertest_config::constants::{
    DOCKERTEST_DOCKERFILE, DOCKERTEST_PATTERN, DOCKERTEST_SOCK_PATH, DOCKERTEST_TIMEOUT_SECS,
    DOCKER_HOST, RUST_LOG,
};
use dockertest_config::{env_duration_secs, env_string};
use dockertest_runner::{Options, RunResult, Runner};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dockertest")]
#[command(about = "Run a Go package's tests inside an isolated Docker container")]
#[command(version)]
struct Cli {
    /// Go package (module root) to copy into the container
    package: PathBuf,

    #[arg(long, help = "go test package pattern [default: ./...]")]
    pattern: Option<String>,

    #[arg(
        long = "arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        help = "Extra go test argument, repeatable"
    )]
    args: Vec<String>,

    #[arg(long = "alias", value_name = "HOST", help = "Network alias for the container, repeatable")]
    aliases: Vec<String>,

    #[arg(long, help = "Mount the host Docker socket into the container")]
    var_sock: bool,

    #[arg(long, value_name = "PATH", help = "Host Docker socket to mount [default: /var/run/docker.sock]")]
    sock_path: Option<PathBuf>,

    #[arg(long, value_name = "SECS", help = "Deadline for the whole run, 0 disables it [default: 600]")]
    timeout: Option<u64>,

    #[arg(long, value_name = "FILE", help = "Dockerfile to build with instead of the built-in one")]
    dockerfile: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Write the coverage profile here")]
    coverage_out: Option<PathBuf>,

    /// Arguments after `--` are passed to go test verbatim
    #[arg(last = true)]
    go_test_args: Vec<String>,
}

/// Fallbacks read from the environment for flags that were not given
#[derive(Debug, Default)]
struct EnvDefaults {
    pattern: Option<String>,
    timeout: Option<Duration>,
    sock_path: Option<PathBuf>,
    dockerfile: Option<PathBuf>,
}

impl EnvDefaults {
    fn from_env() -> Self {
        Self {
            pattern: env_string(DOCKERTEST_PATTERN),
            timeout: env_duration_secs(DOCKERTEST_TIMEOUT_SECS),
            sock_path: env_string(DOCKERTEST_SOCK_PATH).map(PathBuf::from),
            dockerfile: env_string(DOCKERTEST_DOCKERFILE).map(PathBuf::from),
        }
    }
}

fn build_options(cli: &Cli, env: EnvDefaults) -> dockertest_runner::Result<Options> {
    let mut builder = Options::builder(&cli.package)
        .args(cli.args.iter().cloned())
        .args(cli.go_test_args.iter().cloned())
        .aliases(cli.aliases.iter().cloned())
        .var_sock(cli.var_sock);

    if let Some(pattern) = cli.pattern.clone().or(env.pattern) {
        builder = builder.pattern(pattern);
    }
    if let Some(timeout) = cli.timeout.map(Duration::from_secs).or(env.timeout) {
        builder = builder.timeout(timeout);
    }
    if let Some(sock_path) = cli.sock_path.clone().or(env.sock_path) {
        builder = builder.sock_path(sock_path);
    }
    if let Some(dockerfile) = cli.dockerfile.clone().or(env.dockerfile) {
        builder = builder.dockerfile(dockerfile);
    }

    builder.build()
}

/// Process exit status for a finished run
fn exit_status(result: &RunResult) -> i32 {
    i32::try_from(result.exit_code).unwrap_or(1)
}

fn write_coverage(path: &Path, result: &RunResult) -> std::io::Result<bool> {
    match &result.coverage {
        Some(profile) => {
            std::fs::write(path, profile)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(RUST_LOG).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let options = build_options(&cli, EnvDefaults::from_env())?;

    if let Some(host) = env_string(DOCKER_HOST) {
        info!("Using Docker host {}", host);
    }
    let runner = Runner::with_docker().await?;
    let result = runner.run(options).await?;

    if let Some(path) = &cli.coverage_out {
        if write_coverage(path, &result)? {
            info!("Wrote coverage profile to {}", path.display());
        } else {
            warn!("Tests produced no coverage profile; {} not written", path.display());
        }
    }

    if result.passed() {
        eprintln!("{}", "PASS".green().bold());
    } else {
        eprintln!(
            "{} {}",
            "FAIL".red().bold(),
            format!("(exit code {})", result.exit_code).dimmed()
        );
    }

    Ok(exit_status(&result))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}
