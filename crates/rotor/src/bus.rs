//! The bus adapter contract. The consumer loop itself lives outside this
//! worker: whatever drives the broker hands raw message bytes and the
//! current retry count to a [`MessageSink`] and honors the returned
//! disposition -- redeliver with `retries + 1` after a bounded backoff, or
//! advance the consumer offset.

use async_trait::async_trait;
use common::runtime::Runtime;

use crate::handler::{
    EventDisposition,
    MessageHandler,
};

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, payload: &[u8], retries: u32) -> EventDisposition;
}

#[async_trait]
impl<RT: Runtime> MessageSink for MessageHandler<RT> {
    async fn deliver(&self, payload: &[u8], retries: u32) -> EventDisposition {
        self.handle(payload, retries).await
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::MessageSink;
    use crate::handler::EventDisposition;

    /// A bus honoring the adapter contract, for tests: delivers queued
    /// payloads in order and requeues retryable ones with an incremented
    /// retry count, up to a redelivery cap.
    pub struct InMemoryBus {
        queue: Mutex<VecDeque<(Vec<u8>, u32)>>,
        max_redeliveries: u32,
    }

    impl InMemoryBus {
        pub fn new(max_redeliveries: u32) -> Self {
            Self {
                queue: Mutex::new(VecDeque::new()),
                max_redeliveries,
            }
        }

        pub fn publish(&self, payload: Vec<u8>) {
            self.queue.lock().push_back((payload, 0));
        }

        /// Drain the queue through the sink, returning each delivery's
        /// retry count and disposition in order.
        pub async fn run(&self, sink: &dyn MessageSink) -> Vec<(u32, EventDisposition)> {
            let mut history = Vec::new();
            loop {
                let Some((payload, retries)) = self.queue.lock().pop_front() else {
                    break;
                };
                let disposition = sink.deliver(&payload, retries).await;
                history.push((retries, disposition));
                if disposition == EventDisposition::Retry && retries < self.max_redeliveries {
                    self.queue.lock().push_back((payload, retries + 1));
                }
            }
            history
        }
    }
}
