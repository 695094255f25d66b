//! Test implementation of the [`Runtime`] trait. Relies on tokio's virtual
//! time: run tests under `#[tokio::test(start_paused = true)]` and timers
//! auto-advance while the scheduler is idle.

use std::{
    future::Future,
    pin::Pin,
    time::SystemTime,
};

use futures::{
    future::FusedFuture,
    FutureExt,
};
use tokio::time::Duration;

use super::{
    Runtime,
    SpawnHandle,
    TokioSpawnHandle,
};

#[derive(Clone)]
pub struct TestRuntime;

impl TestRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Runtime for TestRuntime {
    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        Box::new(TokioSpawnHandle::from(tokio::spawn(f)))
    }

    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(duration).fuse())
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }
}
