use std::time::Instant;

use common::types::EventContext;
use futures::{
    future::BoxFuture,
    FutureExt,
};
use serde_json::Value as JsonValue;

use crate::{
    exec_log::{
        ExecLog,
        ExecLogEntry,
        StepError,
        StepStatus,
    },
    metrics::log_step_execution,
    FuncReturn,
    FunctionChain,
    StepImpl,
};

pub struct ChainResult {
    pub events: Vec<JsonValue>,
    pub log: ExecLog,
}

/// Run `event` through the chain.
///
/// Each step maps the current event set to the next one: a step may replace
/// an event, fan out into several (order preserved), or drop it. Once the
/// set is empty no further step runs. Step failures never escape: they are
/// captured into the execution log, the failed event leaves the set, and
/// sibling events continue. The caller classifies the log afterwards with
/// [`check_error`](crate::check_error).
pub async fn execute_chain(
    chain: &FunctionChain,
    event: JsonValue,
    ctx: &EventContext,
) -> ChainResult {
    let mut log = ExecLog::new();
    let events = execute_steps(chain, vec![event], ctx, &mut log).await;
    ChainResult { events, log }
}

fn execute_steps<'a>(
    chain: &'a FunctionChain,
    events: Vec<JsonValue>,
    ctx: &'a EventContext,
    log: &'a mut ExecLog,
) -> BoxFuture<'a, Vec<JsonValue>> {
    async move {
        let mut current = events;
        for step in &chain.steps {
            if current.is_empty() {
                break;
            }
            let started = Instant::now();
            let mut next = Vec::with_capacity(current.len());
            let mut first_error: Option<StepError> = None;
            match &step.imp {
                StepImpl::Func(func) => {
                    for event in current {
                        match func.exec(event, ctx).await {
                            Ok(FuncReturn::Event(event)) => next.push(event),
                            Ok(FuncReturn::Events(events)) => next.extend(events),
                            Ok(FuncReturn::Drop) => {},
                            Err(e) => {
                                tracing::debug!("Step {} failed: {e:#}", step.id);
                                if first_error.is_none() {
                                    first_error = Some(StepError::of(&e));
                                }
                            },
                        }
                    }
                },
                StepImpl::Pipeline(inner) => {
                    // The nested chain runs per event with the same reduced
                    // context and appends its own entries to the shared log.
                    for event in current {
                        let produced =
                            execute_steps(inner, vec![event], ctx, &mut *log).await;
                        next.extend(produced);
                    }
                },
            }
            let status = match first_error {
                Some(error) => StepStatus::Error { error },
                None if next.is_empty() => StepStatus::Dropped,
                None => StepStatus::Ok {
                    events: next.len(),
                },
            };
            log_step_execution(
                step.kind,
                !matches!(status, StepStatus::Error { .. }),
                started.elapsed(),
            );
            log.push(ExecLogEntry {
                function_id: step.id.clone(),
                status,
                duration: started.elapsed(),
            });
            current = next;
        }
        current
    }
    .boxed()
}
