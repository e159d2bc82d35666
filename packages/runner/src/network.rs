// ABOUTME: Isolated per-run network owned by one orchestration
// ABOUTME: Creation returns a session plus a release handle that removes the network at most once

use crate::engine::{Engine, NetworkHandle};
use crate::error::{Result, RunnerError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct NetworkState {
    engine: Arc<dyn Engine>,
    handle: Mutex<Option<NetworkHandle>>,
}

impl NetworkState {
    async fn remove(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_ref() else {
            return Ok(());
        };

        debug!("Removing network {}", handle.name);
        self.engine
            .remove_network(handle)
            .await
            .map_err(RunnerError::NetworkRemove)?;
        info!("Removed network {}", handle.name);

        *guard = None;
        Ok(())
    }
}

/// A network containers can join to reach each other by alias
#[derive(Clone)]
pub struct NetworkSession {
    name: String,
    state: Arc<NetworkState>,
}

/// Removes the network it was created with; see [`NetworkSession::remove`]
pub struct NetworkRelease {
    state: Arc<NetworkState>,
}

impl NetworkSession {
    /// Allocate a new network with an engine-generated unique name.
    pub async fn create(engine: Arc<dyn Engine>) -> Result<(NetworkSession, NetworkRelease)> {
        let handle = engine
            .create_network()
            .await
            .map_err(RunnerError::NetworkCreate)?;
        info!("Created network {}", handle.name);

        let name = handle.name.clone();
        let state = Arc::new(NetworkState {
            engine,
            handle: Mutex::new(Some(handle)),
        });

        let release = NetworkRelease {
            state: Arc::clone(&state),
        };
        Ok((NetworkSession { name, state }, release))
    }

    /// Name other containers use to join this network
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delete the network.
    ///
    /// A no-op once the network is gone. A failed removal keeps the handle so
    /// it can be retried.
    pub async fn remove(&self) -> Result<()> {
        self.state.remove().await
    }
}

impl std::fmt::Debug for NetworkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSession")
            .field("name", &self.name)
            .finish()
    }
}

impl std::fmt::Debug for NetworkRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRelease").finish_non_exhaustive()
    }
}

impl NetworkRelease {
    pub async fn release(self) -> Result<()> {
        self.state.remove().await
    }
}
