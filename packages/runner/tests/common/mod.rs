// ABOUTME: Shared helpers for runner integration tests
// ABOUTME: A recording in-memory engine with configurable failures, delays and exec output

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dockertest_runner::engine::{
    ContainerHandle, ContainerSpec, Engine, EngineError, EngineResult, ExecStream, NetworkHandle,
    OutputChunk, StreamType,
};
use futures::{stream, FutureExt, StreamExt};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NETWORK_NAME: &str = "dockertest-fake";
pub const CONTAINER_ID: &str = "fake-container";

/// Which engine call should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    CreateNetwork,
    BuildAndStart,
    Exec,
    Copy,
    StopAndRemove,
    RemoveNetwork,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    last_spec: Option<ContainerSpec>,
}

/// Engine double that records every call in order
pub struct FakeEngine {
    state: Mutex<State>,
    fail_at: Option<FailAt>,
    network_delay: Duration,
    build_delay: Duration,
    exec_delay: Duration,
    probe_exit_code: i64,
    output: Vec<(StreamType, &'static str)>,
    exit_code: i64,
    coverage: Option<Vec<u8>>,
    panic_on_exec: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_at: None,
            network_delay: Duration::ZERO,
            build_delay: Duration::ZERO,
            exec_delay: Duration::ZERO,
            probe_exit_code: 0,
            output: vec![
                (StreamType::Stdout, "=== RUN   TestAdd\n--- PASS: TestAdd (0.00s)\n"),
                (StreamType::Stdout, "PASS\ncoverage: 100.0% of statements\n"),
                (StreamType::Stdout, "ok  \texample.com/simple\t0.002s\n"),
            ],
            exit_code: 0,
            coverage: Some(b"mode: set\nexample.com/simple/math.go:9.27,9.40 1 1\n".to_vec()),
            panic_on_exec: false,
        }
    }

    pub fn failing_at(mut self, at: FailAt) -> Self {
        self.fail_at = Some(at);
        self
    }

    pub fn with_network_delay(mut self, delay: Duration) -> Self {
        self.network_delay = delay;
        self
    }

    /// Readiness checks always exit non-zero
    pub fn never_ready(mut self) -> Self {
        self.probe_exit_code = 1;
        self
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    pub fn with_output(mut self, output: Vec<(StreamType, &'static str)>, exit_code: i64) -> Self {
        self.output = output;
        self.exit_code = exit_code;
        self
    }

    pub fn without_coverage(mut self) -> Self {
        self.coverage = None;
        self
    }

    pub fn panicking_on_exec(mut self) -> Self {
        self.panic_on_exec = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }

    fn check(&self, at: FailAt) -> EngineResult<()> {
        if self.fail_at == Some(at) {
            Err(EngineError::ContainerError(format!("injected {:?} failure", at)))
        } else {
            Ok(())
        }
    }

    fn is_probe(argv: &[String]) -> bool {
        argv.first().map(String::as_str) == Some("echo")
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn create_network(&self) -> EngineResult<NetworkHandle> {
        self.record("create_network");
        tokio::time::sleep(self.network_delay).await;
        self.check(FailAt::CreateNetwork)?;
        Ok(NetworkHandle {
            id: NETWORK_NAME.to_string(),
            name: NETWORK_NAME.to_string(),
        })
    }

    async fn remove_network(&self, _network: &NetworkHandle) -> EngineResult<()> {
        self.record("remove_network");
        self.check(FailAt::RemoveNetwork)
    }

    async fn build_and_start(&self, spec: ContainerSpec) -> EngineResult<ContainerHandle> {
        self.record("build_and_start");
        self.state.lock().unwrap().last_spec = Some(spec);
        tokio::time::sleep(self.build_delay).await;
        self.check(FailAt::BuildAndStart)?;
        Ok(ContainerHandle {
            id: CONTAINER_ID.to_string(),
            image: Some("dockertest-fake:latest".to_string()),
        })
    }

    async fn exec(&self, _container: &ContainerHandle, argv: Vec<String>) -> EngineResult<ExecStream> {
        if Self::is_probe(&argv) {
            self.record("probe");
            let exit_code = self.probe_exit_code;
            return Ok(ExecStream {
                output: stream::iter(vec![Ok(OutputChunk {
                    stream: StreamType::Stdout,
                    data: Bytes::from_static(b"ready\n"),
                })])
                .boxed(),
                exit_code: async move { Ok(exit_code) }.boxed(),
            });
        }

        self.record(format!("exec:{}", argv.join(" ")));
        if self.panic_on_exec {
            panic!("engine exploded during exec");
        }
        tokio::time::sleep(self.exec_delay).await;
        self.check(FailAt::Exec)?;

        let chunks: Vec<EngineResult<OutputChunk>> = self
            .output
            .iter()
            .map(|(stream, text)| {
                Ok(OutputChunk {
                    stream: *stream,
                    data: Bytes::from_static(text.as_bytes()),
                })
            })
            .collect();
        let exit_code = self.exit_code;

        Ok(ExecStream {
            output: stream::iter(chunks).boxed(),
            exit_code: async move { Ok(exit_code) }.boxed(),
        })
    }

    async fn copy_file_out(
        &self,
        _container: &ContainerHandle,
        path: &str,
    ) -> EngineResult<Option<Vec<u8>>> {
        self.record(format!("copy:{}", path));
        self.check(FailAt::Copy)?;
        Ok(self.coverage.clone())
    }

    async fn stop_and_remove(&self, _container: &ContainerHandle) -> EngineResult<()> {
        self.record("stop_and_remove");
        self.check(FailAt::StopAndRemove)
    }
}

/// A minimal Go module in a temporary directory
pub fn go_package() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("go.mod"), "module example.com/simple\n\ngo 1.25\n").unwrap();
    std::fs::write(
        dir.path().join("math_test.go"),
        "package simple\n\nimport \"testing\"\n\nfunc TestAdd(t *testing.T) {}\n",
    )
    .unwrap();
    dir
}

/// Fixture package shipped with the crate
pub fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
}
