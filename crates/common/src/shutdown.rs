use std::sync::Arc;

// Used by long-lived components to signal they hit a fatal error.
#[derive(Clone)]
pub struct ShutdownSignal {
    shutdown_tx: Option<async_broadcast::Sender<ShutdownMessage>>,
    worker_name: String,
}

#[derive(Clone, Debug)]
pub struct ShutdownMessage {
    pub error: Arc<anyhow::Error>,
    pub worker_name: String,
}

impl ShutdownSignal {
    pub fn new(shutdown_tx: async_broadcast::Sender<ShutdownMessage>, worker_name: String) -> Self {
        Self {
            shutdown_tx: Some(shutdown_tx),
            worker_name,
        }
    }

    pub fn signal(&self, fatal_error: anyhow::Error) {
        if let Some(ref shutdown_tx) = self.shutdown_tx {
            _ = shutdown_tx.try_broadcast(ShutdownMessage {
                error: Arc::new(fatal_error),
                worker_name: self.worker_name.clone(),
            });
        } else {
            // No shutdown signal configured. Just panic.
            panic!("Shutting down due to fatal error: {}", fatal_error);
        }
    }

    // Creates a new ShutdownSignal that panics when signaled.
    pub fn panic() -> Self {
        Self {
            shutdown_tx: None,
            worker_name: "".to_owned(),
        }
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn no_op() -> Self {
        let (sender, _receiver) = async_broadcast::broadcast(1);
        Self {
            shutdown_tx: Some(sender),
            worker_name: "".to_owned(),
        }
    }
}
