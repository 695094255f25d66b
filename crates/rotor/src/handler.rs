use std::sync::Arc;

use common::{
    errors::report_error,
    knobs::MESSAGE_DEADLINE,
    runtime::{
        Runtime,
        WithTimeout,
    },
    types::{
        EventContext,
        IngestMessage,
    },
};
use config_store::{
    ConfigStore,
    ConnectionStore,
    KvStore,
};
use errors::{
    ErrorCode,
    ErrorMetadataAnyhowExt,
};
use pipeline::{
    builder::ChainBuilder,
    check_error,
    execute_chain,
    ChainResult,
};

use crate::metrics::{
    handle_message_timer,
    log_malformed_message,
    log_message_outcome,
};

/// What the bus adapter should do with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Advance the consumer offset. Either the message was processed, or
    /// its failure was fatal and has been recorded; redelivery would only
    /// poison the partition.
    Ack,
    /// Redeliver with `retries + 1` after a backoff.
    Retry,
}

/// Per-message orchestration: decode, resolve the connection, assemble the
/// context, build the chain, execute it under the message deadline, and
/// classify the outcome.
pub struct MessageHandler<RT: Runtime> {
    rt: RT,
    config_store: ConfigStore<RT>,
    kv_store: Arc<dyn KvStore>,
    chain_builder: ChainBuilder<RT>,
}

impl<RT: Runtime> MessageHandler<RT> {
    pub fn new(
        rt: RT,
        config_store: ConfigStore<RT>,
        kv_store: Arc<dyn KvStore>,
        chain_builder: ChainBuilder<RT>,
    ) -> Self {
        Self {
            rt,
            config_store,
            kv_store,
            chain_builder,
        }
    }

    pub async fn handle(&self, payload: &[u8], retries: u32) -> EventDisposition {
        let timer = handle_message_timer();
        let message: IngestMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                // Poison-message policy: an unparseable payload will never
                // parse on redelivery.
                log_malformed_message();
                log_message_outcome("dropped");
                tracing::warn!("Dropping malformed message: {e}");
                return EventDisposition::Ack;
            },
        };
        match self.process(&message, retries).await {
            Ok(result) => {
                timer.finish();
                log_message_outcome("acked");
                tracing::debug!(
                    message_id = %message.message_id,
                    events_out = result.events.len(),
                    "Acking message"
                );
                EventDisposition::Ack
            },
            Err(mut e) => {
                if e.is_retryable() {
                    log_message_outcome("retried");
                    tracing::warn!(
                        message_id = %message.message_id,
                        retries,
                        "Requesting redelivery: {e:#}"
                    );
                    return EventDisposition::Retry;
                }
                log_message_outcome("dropped");
                if e.error_code() == Some(ErrorCode::UnknownConnection) {
                    tracing::warn!(message_id = %message.message_id, "{e:#}");
                } else {
                    report_error(&mut e).await;
                }
                EventDisposition::Ack
            },
        }
    }

    async fn process(&self, message: &IngestMessage, retries: u32) -> anyhow::Result<ChainResult> {
        let connection = self
            .config_store
            .enriched_connection(&message.connection_id)
            .await?;
        let ctx = EventContext::for_message(message, &connection, retries);
        let store = ConnectionStore::new(self.kv_store.clone(), message.connection_id.clone());
        let result = self
            .rt
            .with_timeout("handle_message", *MESSAGE_DEADLINE, async {
                let chain = self
                    .chain_builder
                    .build(&connection, store, None)
                    .await?;
                Ok(execute_chain(&chain, message.http_payload.clone(), &ctx).await)
            })
            .await?;
        tracing::info!(
            workspace_id = %connection.workspace_id,
            message_id = %message.message_id,
            steps = result.log.entries().len(),
            step_errors = result.log.error_count(),
            events_out = result.events.len(),
            "Executed function chain"
        );
        check_error(&result.log)?;
        Ok(result)
    }
}
