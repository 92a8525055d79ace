//! Where compile jobs run: on a blocking thread in this process, or shipped
//! to a pooled worker process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::{
    compiler::{CartoCompiler, CompileRequest},
    error::RenderError,
    pool::{WorkerPool, dispatch, proto::JobRequest},
};

/// Asynchronous seam over compile execution.
#[async_trait]
pub trait CompileExecutor: Send + Sync {
    async fn compile(&self, request: CompileRequest) -> Result<String, RenderError>;
}

/// Runs the compiler on the blocking thread pool of the current runtime.
pub struct InProcessExecutor {
    compiler: Arc<dyn CartoCompiler>,
}

impl InProcessExecutor {
    pub fn new(compiler: Arc<dyn CartoCompiler>) -> Self {
        Self { compiler }
    }
}

#[async_trait]
impl CompileExecutor for InProcessExecutor {
    async fn compile(&self, request: CompileRequest) -> Result<String, RenderError> {
        let compiler = Arc::clone(&self.compiler);
        let result = tokio::task::spawn_blocking(move || compiler.compile(&request))
            .await
            .map_err(|err| RenderError::unexpected(format!("compile task aborted: {err}")))?;
        result.map_err(RenderError::from)
    }
}

/// Ships the compile job to a worker process via the pool dispatcher.
pub struct PooledExecutor {
    pool: Arc<WorkerPool>,
}

impl PooledExecutor {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompileExecutor for PooledExecutor {
    async fn compile(&self, request: CompileRequest) -> Result<String, RenderError> {
        let payload = serde_json::to_value(&request)
            .map_err(|err| RenderError::unexpected(format!("compile payload: {err}")))?;
        let value = dispatch(&self.pool, &JobRequest::compile(payload)).await?;
        match value {
            Value::String(xml) => Ok(xml),
            other => Err(RenderError::unexpected(format!(
                "worker returned a non-text compile result: {other}"
            ))),
        }
    }
}
