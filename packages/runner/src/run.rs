// ABOUTME: End-to-end orchestration of a containerized go test run
// ABOUTME: Network then container then tests then coverage, with ordered teardown on every exit path

use crate::container::{ContainerConfig, ContainerSession, OutputMode};
use crate::engine::{DockerEngine, Engine};
use crate::error::{classify_phase_error, Phase, Result, RunnerError};
use crate::exec::go_test_command;
use crate::network::NetworkSession;
use crate::options::Options;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a run that got as far as executing the tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Combined stdout and stderr of `go test`
    pub stdout: Vec<u8>,
    /// Coverage profile, `None` when the tests produced none
    pub coverage: Option<Vec<u8>>,
    pub exit_code: i64,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Deadline shared by every step of one run
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        let at = (!budget.is_zero())
            .then(|| Instant::now().checked_add(budget))
            .flatten();
        Self { at, budget }
    }

    fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    async fn bound<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.at {
            None => fut.await,
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| RunnerError::DeadlineExceeded(self.budget))?,
        }
    }

    /// Bound `fut` and tag its failure with `phase`
    async fn guard<T, F>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.bound(fut)
            .await
            .map_err(|e| classify_phase_error(e, phase, self.expired()))
    }

    /// Await a spawned step that allocates something, tagging failures with `phase`.
    ///
    /// When the deadline fires first the task keeps running and is handed
    /// back, so whatever it goes on to create can still be released.
    async fn settle<T>(&self, phase: Phase, mut task: Pending<T>) -> Settled<T> {
        let joined = match self.at {
            None => (&mut task).await,
            Some(at) => match tokio::time::timeout_at(at, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    let err = RunnerError::DeadlineExceeded(self.budget);
                    return Settled::Overdue(classify_phase_error(err, phase, true), task);
                }
            },
        };

        Settled::Done(
            step_result(joined).map_err(|e| classify_phase_error(e, phase, self.expired())),
        )
    }
}

/// A spawned step whose output must be released by the run
type Pending<T> = JoinHandle<Result<T>>;

enum Settled<T> {
    Done(Result<T>),
    /// Deadline fired while the step was still running
    Overdue(RunnerError, Pending<T>),
}

fn step_result<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(RunnerError::Interrupted(e.to_string())),
    }
}

/// Wait for a step the deadline gave up on and take what it produced.
async fn reap<T>(task: Pending<T>) -> Option<T> {
    info!("Waiting for an interrupted step to finish so its resources can be released");
    match task.await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            debug!("Interrupted step failed on its own: {}", e);
            None
        }
        Err(e) => {
            warn!("Interrupted step did not complete: {}", e);
            None
        }
    }
}

/// Everything a run allocates inside its network
#[derive(Default)]
struct Allocated {
    container: Option<ContainerSession>,
    /// Container start the deadline stopped waiting for
    starting: Option<Pending<ContainerSession>>,
}

/// Runs Go test suites in throwaway containers
#[derive(Clone)]
pub struct Runner {
    engine: Arc<dyn Engine>,
}

impl Runner {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Runner backed by the local Docker daemon
    pub async fn with_docker() -> Result<Self> {
        let engine = DockerEngine::connect().await.map_err(RunnerError::Connect)?;
        Ok(Self::new(Arc::new(engine)))
    }

    /// Run the tests, streaming their output to this process's stdout.
    pub async fn run(&self, options: Options) -> Result<RunResult> {
        self.run_with_output(options, tokio::io::stdout()).await
    }

    /// Run the tests, streaming their output to `output` as it is produced.
    ///
    /// A failing test suite is a successful run with a non-zero exit code.
    /// The container is removed before the network, whether the run
    /// succeeds, fails or panics. Teardown failures are logged and never
    /// replace the run's own result. A network or container still being
    /// created when the deadline fires is waited for and then removed, so a
    /// timed-out run can return after its deadline.
    pub async fn run_with_output<W>(&self, options: Options, mut output: W) -> Result<RunResult>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let options = options.validate()?;
        let deadline = Deadline::new(options.timeout);

        info!(
            "Running {} in {}",
            options.pattern,
            options.package_path.display()
        );

        let creating = tokio::spawn(NetworkSession::create(Arc::clone(&self.engine)));
        let (network, release) = match deadline.settle(Phase::CreateNetwork, creating).await {
            Settled::Done(created) => created?,
            Settled::Overdue(err, creating) => {
                if let Some((network, release)) = reap(creating).await {
                    if let Err(e) = release.release().await {
                        warn!("Failed to remove network {}: {}", network.name(), e);
                    }
                }
                return Err(err);
            }
        };

        let mut allocated = Allocated::default();
        let outcome = AssertUnwindSafe(self.run_in_network(
            &options,
            &network,
            deadline,
            &mut allocated,
            &mut output,
        ))
        .catch_unwind()
        .await;

        if let Some(starting) = allocated.starting.take() {
            allocated.container = reap(starting).await;
        }
        if let Some(mut container) = allocated.container {
            if let Err(e) = container.terminate().await {
                warn!("Failed to terminate test container: {}", e);
            }
        }
        if let Err(e) = release.release().await {
            warn!("Failed to remove network {}: {}", network.name(), e);
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_in_network<W>(
        &self,
        options: &Options,
        network: &NetworkSession,
        deadline: Deadline,
        allocated: &mut Allocated,
        output: &mut W,
    ) -> Result<RunResult>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut config = ContainerConfig::new(&options.package_path)
            .with_network(network)
            .with_aliases(options.aliases.iter().cloned())
            .with_docker_socket(options.enable_var_sock)
            .with_sock_path(&options.sock_path);
        if let Some(dockerfile) = &options.dockerfile {
            config = config.with_dockerfile(dockerfile);
        }

        let starting = tokio::spawn(ContainerSession::start(Arc::clone(&self.engine), config));
        let container = match deadline.settle(Phase::CreateContainer, starting).await {
            Settled::Done(started) => allocated.container.insert(started?),
            Settled::Overdue(err, starting) => {
                allocated.starting = Some(starting);
                return Err(err);
            }
        };
        deadline
            .guard(Phase::CreateContainer, container.wait_until_ready())
            .await?;

        let argv = go_test_command(&options.coverage_file, &options.pattern, &options.args);
        let executed = deadline
            .guard(
                Phase::ExecuteTests,
                container.execute_command(argv, OutputMode::Combined, output),
            )
            .await?;
        info!("Tests exited with code {}", executed.exit_code);

        let coverage = match deadline
            .bound(container.copy_coverage_from(&options.coverage_file))
            .await
        {
            Ok(coverage) => coverage,
            Err(e) => {
                warn!("Could not retrieve coverage profile: {}", e);
                None
            }
        };

        Ok(RunResult {
            stdout: executed.output,
            coverage,
            exit_code: executed.exit_code,
        })
    }
}

/// Run `options` against the local Docker daemon.
pub async fn run(options: Options) -> Result<RunResult> {
    let options = options.validate()?;
    Runner::with_docker().await?.run(options).await
}
