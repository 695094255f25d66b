//! Scriptable stand-in for the external UDF compiler.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use errors::ErrorMetadata;
use parking_lot::Mutex;
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::{
    UdfCompiler,
    UdfContext,
    UdfOutcome,
    UdfWrapper,
};

/// What a scripted function does with each event.
#[derive(Clone)]
pub enum TestBehavior {
    /// Return the event unchanged.
    Echo,
    /// Return the event with one extra field.
    AppendField(String, JsonValue),
    /// Emit `n` copies of the event, each with an ordinal `seq` field.
    FanOut(usize),
    /// Swallow the event.
    Drop,
    /// Every invocation fails like a user throw.
    Fail(String),
    /// Compilation itself fails.
    FailCompile(String),
    /// The next `n` invocations (across wrapper generations) raise the
    /// disposed signal; afterwards the function echoes.
    DisposedTimes(Arc<AtomicUsize>),
    /// Increment a counter in the connection store and annotate the event
    /// with the new value under `count`.
    StoreCounter(String),
    /// Annotate the event with the invocation's retry count under
    /// `retries`.
    TagRetries,
}

impl TestBehavior {
    pub fn disposed_times(n: usize) -> Self {
        TestBehavior::DisposedTimes(Arc::new(AtomicUsize::new(n)))
    }
}

pub struct ScriptedCompiler {
    behaviors: Mutex<HashMap<String, TestBehavior>>,
    compile_counts: Mutex<HashMap<String, usize>>,
    close_counts: Arc<Mutex<HashMap<String, usize>>>,
    compile_delay: bool,
}

impl ScriptedCompiler {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            compile_counts: Mutex::new(HashMap::new()),
            close_counts: Arc::new(Mutex::new(HashMap::new())),
            compile_delay: false,
        }
    }

    /// Make every compile take a moment, so tests can overlap acquires.
    pub fn with_compile_delay(mut self) -> Self {
        self.compile_delay = true;
        self
    }

    pub fn set_behavior(&self, function_id: &str, behavior: TestBehavior) {
        self.behaviors.lock().insert(function_id.to_owned(), behavior);
    }

    pub fn compile_count(&self, function_id: &str) -> usize {
        self.compile_counts
            .lock()
            .get(function_id)
            .copied()
            .unwrap_or(0)
    }

    /// How many wrappers for this function have been closed. Each wrapper
    /// counts at most once no matter how often `close` is called on it.
    pub fn close_count(&self, function_id: &str) -> usize {
        self.close_counts
            .lock()
            .get(function_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl UdfCompiler for ScriptedCompiler {
    async fn compile(
        &self,
        function_id: &str,
        name: &str,
        _code: &str,
    ) -> anyhow::Result<Box<dyn UdfWrapper>> {
        *self
            .compile_counts
            .lock()
            .entry(function_id.to_owned())
            .or_insert(0) += 1;
        let behavior = self
            .behaviors
            .lock()
            .get(function_id)
            .cloned()
            .unwrap_or(TestBehavior::Echo);
        if self.compile_delay {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if let TestBehavior::FailCompile(message) = behavior {
            anyhow::bail!(ErrorMetadata::udf_runtime(
                "UdfCompileFailed",
                format!("Function {name} failed to compile: {message}"),
            ));
        }
        Ok(Box::new(TestWrapper {
            function_id: function_id.to_owned(),
            behavior,
            close_counts: self.close_counts.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct TestWrapper {
    function_id: String,
    behavior: TestBehavior,
    close_counts: Arc<Mutex<HashMap<String, usize>>>,
    closed: AtomicBool,
}

#[async_trait]
impl UdfWrapper for TestWrapper {
    async fn invoke(&self, event: &JsonValue, ctx: &UdfContext) -> anyhow::Result<UdfOutcome> {
        match &self.behavior {
            TestBehavior::Echo => Ok(UdfOutcome::Event(event.clone())),
            TestBehavior::AppendField(key, value) => {
                let mut event = event.clone();
                if let Some(obj) = event.as_object_mut() {
                    obj.insert(key.clone(), value.clone());
                }
                Ok(UdfOutcome::Event(event))
            },
            TestBehavior::FanOut(n) => {
                let events = (0..*n)
                    .map(|seq| {
                        let mut event = event.clone();
                        if let Some(obj) = event.as_object_mut() {
                            obj.insert("seq".to_owned(), json!(seq));
                        }
                        event
                    })
                    .collect();
                Ok(UdfOutcome::Events(events))
            },
            TestBehavior::Drop => Ok(UdfOutcome::Drop),
            TestBehavior::Fail(message) => Err(ErrorMetadata::udf_runtime(
                "UdfThrew",
                format!("Function {} failed: {message}", self.function_id),
            )
            .into()),
            TestBehavior::FailCompile(_) => unreachable!("rejected at compile time"),
            TestBehavior::DisposedTimes(remaining) => {
                let disposed = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if disposed {
                    Err(ErrorMetadata::sandbox_disposed(&self.function_id).into())
                } else {
                    Ok(UdfOutcome::Event(event.clone()))
                }
            },
            TestBehavior::StoreCounter(key) => {
                let current = ctx
                    .store
                    .get(key)
                    .await?
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                let next = current + 1;
                ctx.store.set(key, &json!(next)).await?;
                let mut event = event.clone();
                if let Some(obj) = event.as_object_mut() {
                    obj.insert("count".to_owned(), json!(next));
                }
                Ok(UdfOutcome::Event(event))
            },
            TestBehavior::TagRetries => {
                let mut event = event.clone();
                if let Some(obj) = event.as_object_mut() {
                    obj.insert("retries".to_owned(), json!(ctx.event_context.retries));
                }
                Ok(UdfOutcome::Event(event))
            },
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self
            .close_counts
            .lock()
            .entry(self.function_id.clone())
            .or_insert(0) += 1;
    }
}
