//! Job dispatch over the worker pool: acquire, run with a wall-clock budget,
//! classify the reply, and hand the worker back in the right health state.

use std::time::Instant;

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    PoolError, WorkerPool,
    proto::{JobRequest, JobResponse},
};
use serde_json::Value;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No worker could be obtained for the job.
    #[error("unable to generate output")]
    Failed {
        #[source]
        source: PoolError,
    },
    /// The job exceeded its wall-clock budget; the worker was destroyed.
    #[error("job timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// The worker replied without a usable result, or died mid-job.
    #[error("unable to produce output")]
    NoOutput,
    /// The worker reported a job-level failure; the message is the worker's,
    /// verbatim.
    #[error("{0}")]
    Job(String),
}

/// Run one job on the pool. Transport failures and timeouts destroy the
/// worker; job-level failures and successes return it to the idle list.
pub async fn dispatch(pool: &WorkerPool, request: &JobRequest) -> Result<Value, DispatchError> {
    let started_at = Instant::now();
    let mut worker = match pool.acquire().await {
        Ok(worker) => worker,
        Err(source) => {
            counter!("cartomill_job_failure_total").increment(1);
            return Err(DispatchError::Failed { source });
        }
    };

    let run = worker.run(request);
    let exchanged = match pool.job_timeout() {
        Some(limit) => match timeout(limit, run).await {
            Ok(exchanged) => exchanged,
            Err(_) => {
                // The worker may be wedged mid-reply; destroy it.
                pool.release(worker, false).await;
                let timeout_ms = limit.as_millis() as u64;
                counter!("cartomill_job_timeout_total").increment(1);
                warn!(
                    target = "application::pool",
                    op = "pool::dispatch",
                    result = "timeout",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    timeout_ms,
                    action = ?request.action,
                    "Job exceeded its time budget; worker destroyed"
                );
                return Err(DispatchError::Timeout { timeout_ms });
            }
        },
        None => run.await,
    };

    let response = match exchanged {
        Ok(response) => response,
        Err(err) => {
            pool.release(worker, false).await;
            counter!("cartomill_job_failure_total").increment(1);
            warn!(
                target = "application::pool",
                op = "pool::dispatch",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "worker_io",
                error = %err,
                action = ?request.action,
                "Worker exchange failed; worker destroyed"
            );
            return Err(DispatchError::NoOutput);
        }
    };

    // A well-formed reply leaves the worker reusable regardless of outcome.
    pool.release(worker, true).await;
    histogram!("cartomill_job_ms").record(started_at.elapsed().as_millis() as f64);

    match response {
        JobResponse {
            error: Some(message),
            ..
        } => {
            counter!("cartomill_job_failure_total").increment(1);
            info!(
                target = "application::pool",
                op = "pool::dispatch",
                result = "job_error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                action = ?request.action,
                "Worker reported a job failure"
            );
            Err(DispatchError::Job(message))
        }
        JobResponse {
            result: Some(value),
            ..
        } => {
            counter!("cartomill_job_ok_total").increment(1);
            info!(
                target = "application::pool",
                op = "pool::dispatch",
                result = "ok",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                action = ?request.action,
                "Job completed"
            );
            Ok(value)
        }
        JobResponse { .. } => {
            counter!("cartomill_job_failure_total").increment(1);
            warn!(
                target = "application::pool",
                op = "pool::dispatch",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "empty_response",
                action = ?request.action,
                "Worker replied without a result"
            );
            Err(DispatchError::NoOutput)
        }
    }
}
