//! Production implementation of the Runtime trait.

use std::{
    future::Future,
    pin::Pin,
    time::SystemTime,
};

use common::runtime::{
    Runtime,
    SpawnHandle,
    TokioSpawnHandle,
};
use futures::{
    future::FusedFuture,
    FutureExt,
};
use tokio::{
    runtime::{
        Builder,
        Handle as TokioRuntimeHandle,
        Runtime as TokioRuntime,
    },
    time::{
        sleep,
        Duration,
    },
};

/// Runtime for running in production that sleeps for wallclock time, spawns
/// onto a shared multi-threaded tokio executor, etc.
#[derive(Clone)]
pub struct ProdRuntime {
    rt: TokioRuntimeHandle,
}

impl ProdRuntime {
    pub fn init_tokio() -> anyhow::Result<TokioRuntime> {
        assert!(
            TokioRuntimeHandle::try_current().is_err(),
            "Tried to create a `ProdRuntime` from within a Tokio context. Are you using \
             `#[tokio::main]` or `#[tokio::test]`?"
        );
        let tokio_rt = Builder::new_multi_thread().enable_all().build()?;
        Ok(tokio_rt)
    }

    /// The `tokio_rt` must live for the duration of `main`: dropping it joins
    /// all spawned tasks, which should include every clone of the returned
    /// handle.
    pub fn new(tokio_rt: &TokioRuntime) -> Self {
        Self {
            rt: tokio_rt.handle().clone(),
        }
    }

    pub fn block_on<F: Future>(&self, name: &'static str, f: F) -> F::Output {
        tracing::debug!("Entering main future {name}");
        self.rt.block_on(f)
    }
}

impl Runtime for ProdRuntime {
    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        Box::new(TokioSpawnHandle::from(self.rt.spawn(f)))
    }

    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(sleep(duration).fuse())
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }
}
