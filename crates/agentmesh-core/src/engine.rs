//! Execution engine seam — whatever answers free-text queries
//!
//! The engine itself lives outside this workspace (a language-model agent with
//! its own tools). Async engines implement [`ExecutionEngine`] directly;
//! synchronous ones are wrapped in [`BlockingEngine`], which moves every call
//! onto tokio's blocking pool so the runtime never stalls.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn run(&self, query: &str) -> Result<String>;
}

type BlockingFn = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Adapter presenting a synchronous engine through the async interface.
///
/// A call abandoned by a timeout keeps running on its worker thread; the
/// result is dropped when it eventually returns.
#[derive(Clone)]
pub struct BlockingEngine {
    run: Arc<BlockingFn>,
}

impl BlockingEngine {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self { run: Arc::new(run) }
    }
}

#[async_trait]
impl ExecutionEngine for BlockingEngine {
    async fn run(&self, query: &str) -> Result<String> {
        let run = Arc::clone(&self.run);
        let query = query.to_owned();
        tokio::task::spawn_blocking(move || run(&query))
            .await
            .context("Execution engine worker panicked")?
    }
}
