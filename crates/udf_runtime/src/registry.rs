use std::{
    collections::HashMap,
    sync::Arc,
};

use anyhow::Context;
use common::{
    knobs::{
        CACHE_SWEEP_INTERVAL,
        UDF_CACHE_TTL,
    },
    runtime::Runtime,
    sha256::CodeHash,
};
use errors::ErrorMetadata;
use parking_lot::Mutex;
use ttl_cache::TtlCache;

use crate::{
    metrics::{
        log_udf_rebuild,
        udf_compile_timer,
    },
    CompiledUdf,
    UdfCompiler,
};

type BuildResult = Result<Arc<CompiledUdf>, Arc<anyhow::Error>>;

enum BuildPlan {
    Wait(async_broadcast::Receiver<BuildResult>),
    Build(async_broadcast::Sender<BuildResult>),
}

/// Owns the compiled-UDF cache. `acquire` is the only way in: it returns
/// the cached sandbox when the caller's code hashes to the cached hash, and
/// otherwise compiles a replacement, closing the stale sandbox exactly once.
/// Concurrent compiles of the same function id collapse into one
/// (per-key single flight).
pub struct UdfRegistry<RT: Runtime> {
    compiler: Arc<dyn UdfCompiler>,
    cache: TtlCache<RT, CompiledUdf>,
    inflight: Arc<Mutex<HashMap<String, async_broadcast::Receiver<BuildResult>>>>,
}

impl<RT: Runtime> Clone for UdfRegistry<RT> {
    fn clone(&self) -> Self {
        Self {
            compiler: self.compiler.clone(),
            cache: self.cache.clone(),
            inflight: self.inflight.clone(),
        }
    }
}

impl<RT: Runtime> UdfRegistry<RT> {
    pub fn new(rt: RT, compiler: Arc<dyn UdfCompiler>) -> Self {
        let cache = TtlCache::new(
            rt,
            "compiled_udfs",
            *CACHE_SWEEP_INTERVAL,
            Some(Arc::new(|_key: &str, compiled: Arc<CompiledUdf>| {
                compiled.close();
            })),
        );
        Self {
            compiler,
            cache,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return a live sandbox for `code`. Refreshes the entry's TTL on every
    /// hit, so hot functions never expire.
    pub async fn acquire(
        &self,
        function_id: &str,
        name: &str,
        code: &str,
    ) -> anyhow::Result<Arc<CompiledUdf>> {
        let hash = CodeHash::of(code);
        loop {
            if let Some(compiled) = self.cache.get(function_id) {
                if compiled.hash() == hash {
                    self.cache.touch(function_id, *UDF_CACHE_TTL);
                    return Ok(compiled);
                }
            }
            if let Some(compiled) = self.join_or_build(function_id, name, code, hash).await? {
                return Ok(compiled);
            }
        }
    }

    /// Replace a disposed sandbox with a freshly compiled one for the same
    /// code. Skips the cache fast path -- the cached entry is the disposed
    /// one -- but still collapses concurrent rebuilds into one compile.
    pub async fn rebuild(
        &self,
        function_id: &str,
        name: &str,
        code: &str,
    ) -> anyhow::Result<Arc<CompiledUdf>> {
        let hash = CodeHash::of(code);
        log_udf_rebuild();
        tracing::warn!("Rebuilding disposed sandbox for function {function_id}");
        loop {
            if let Some(compiled) = self.join_or_build(function_id, name, code, hash).await? {
                return Ok(compiled);
            }
        }
    }

    /// Evict everything, closing every cached sandbox. Used on shutdown.
    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    /// One round of the single-flight protocol. Returns a compiled UDF for
    /// `hash`, or `None` when a concurrent build produced different code and
    /// the caller should re-check the cache.
    async fn join_or_build(
        &self,
        function_id: &str,
        name: &str,
        code: &str,
        hash: CodeHash,
    ) -> anyhow::Result<Option<Arc<CompiledUdf>>> {
        let plan = {
            let mut inflight = self.inflight.lock();
            match inflight.get(function_id) {
                Some(rx) => BuildPlan::Wait(rx.clone()),
                None => {
                    let (tx, rx) = async_broadcast::broadcast(1);
                    inflight.insert(function_id.to_owned(), rx);
                    BuildPlan::Build(tx)
                },
            }
        };
        match plan {
            BuildPlan::Wait(mut rx) => match rx.recv().await {
                Ok(Ok(compiled)) if compiled.hash() == hash => Ok(Some(compiled)),
                // The concurrent build compiled different code; go around.
                Ok(Ok(_)) => Ok(None),
                Ok(Err(e)) => Err(shared_error(&e)),
                // Builder dropped without broadcasting; go around.
                Err(_) => Ok(None),
            },
            BuildPlan::Build(tx) => {
                let result = self.build(function_id, name, code, hash).await;
                // Broadcast before dropping the inflight receiver so waiters
                // that cloned it late still see the buffered result.
                let _ = tx.broadcast(result.clone()).await;
                self.inflight.lock().remove(function_id);
                match result {
                    Ok(compiled) => Ok(Some(compiled)),
                    Err(e) => Err(shared_error(&e)),
                }
            },
        }
    }

    async fn build(
        &self,
        function_id: &str,
        name: &str,
        code: &str,
        hash: CodeHash,
    ) -> BuildResult {
        let timer = udf_compile_timer();
        let wrapper = self
            .compiler
            .compile(function_id, name, code)
            .await
            .with_context(|| format!("Compiling function {function_id}"))
            .map_err(Arc::new)?;
        let compiled = Arc::new(CompiledUdf::new(
            function_id.to_owned(),
            hash,
            Arc::from(wrapper),
        ));
        // Removing the stale entry runs its close hook; inserting afterwards
        // keeps the hook from ever seeing the fresh wrapper.
        self.cache.remove(function_id);
        self.cache.set(function_id, compiled.clone(), *UDF_CACHE_TTL);
        timer.finish();
        Ok(compiled)
    }
}

/// Reconstruct an owned error from one shared between single-flight
/// waiters, preserving the taxonomy classification.
fn shared_error(e: &Arc<anyhow::Error>) -> anyhow::Error {
    let base = anyhow::anyhow!("{e:#}");
    match e.downcast_ref::<ErrorMetadata>() {
        Some(em) => base.context(em.clone()),
        None => base,
    }
}
