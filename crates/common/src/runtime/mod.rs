//! Runtime trait abstracting OS-esque features (spawning, sleeping, clocks)
//! so components can run against wall-clock time in production and virtual
//! time in tests.

use std::{
    future::Future,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use ::errors::ErrorMetadata;
use futures::{
    future::{
        BoxFuture,
        FusedFuture,
    },
    select_biased,
    FutureExt,
};

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    #[error("Task canceled")]
    Canceled,
    #[error("Task panicked: {0:?}")]
    Panicked(anyhow::Error),
}

impl From<tokio::task::JoinError> for JoinError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            JoinError::Canceled
        } else {
            JoinError::Panicked(anyhow::anyhow!(e.to_string()))
        }
    }
}

pub trait SpawnHandle: Send + Sync {
    fn shutdown(&mut self);
    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>>;
}

/// A tokio-backed [`SpawnHandle`], shared by the production and test
/// runtimes.
pub struct TokioSpawnHandle {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl From<tokio::task::JoinHandle<()>> for TokioSpawnHandle {
    fn from(handle: tokio::task::JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl SpawnHandle for TokioSpawnHandle {
    fn shutdown(&mut self) {
        if let Some(ref handle) = self.handle {
            handle.abort();
        }
    }

    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>> {
        let handle = self.handle.take();
        async move {
            match handle {
                Some(handle) => handle.await.map_err(JoinError::from),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

/// An operating-system abstraction for application code: time, sleeping, and
/// task spawning go through this trait so tests can virtualize them.
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Spawn a named task on the runtime's executor.
    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle>;

    /// Sleep for the given duration.
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>>;

    /// A (potentially-virtualized) wall clock.
    fn system_time(&self) -> SystemTime;

    /// A (potentially-virtualized) monotonic clock.
    fn monotonic_now(&self) -> tokio::time::Instant;
}

#[async_trait]
pub trait WithTimeout {
    /// Run `fut` under a deadline; expiry produces a retryable
    /// [`ErrorCode::Timeout`](errors::ErrorCode::Timeout) error.
    async fn with_timeout<T: Send>(
        &self,
        description: &'static str,
        duration: Duration,
        fut: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> anyhow::Result<T>;
}

#[async_trait]
impl<RT: Runtime> WithTimeout for RT {
    async fn with_timeout<T: Send>(
        &self,
        description: &'static str,
        duration: Duration,
        fut: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> anyhow::Result<T> {
        select_biased! {
            result = fut.fuse() => result,
            _ = self.wait(duration) => {
                anyhow::bail!(ErrorMetadata::timeout(format!(
                    "'{description}' timed out after {duration:?}"
                )));
            },
        }
    }
}
