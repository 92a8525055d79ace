//! Worker process pool: a bounded set of reusable out-of-process workers
//! speaking the line-delimited JSON job protocol.
//!
//! Workers are spawned lazily up to the configured ceiling, parked on an idle
//! list between jobs, and retired when they die, when the pool is reset, or
//! when they sit idle past the idle timeout. All coordination goes through a
//! single mutex-guarded state plus a [`Notify`] for waiters.

pub mod dispatch;
pub mod proto;
mod worker;

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Weak},
    time::Duration,
};

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify},
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

pub use dispatch::{DispatchError, dispatch};
pub use worker::WorkerCommand;

use worker::PooledWorker;

const MIN_REAP_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[from] io::Error),
    #[error("worker pool is shut down")]
    Closed,
}

/// Pool sizing and timing knobs, resolved from settings by the caller.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub command: WorkerCommand,
    /// Workers pre-warmed at startup and kept alive through idle reaping.
    pub min_workers: usize,
    /// Upper bound on concurrently live workers, idle ones included.
    pub max_workers: usize,
    /// Idle workers older than this are reaped. Zero disables reaping.
    pub idle_timeout: Duration,
    /// Per-job wall-clock budget enforced by the dispatcher. `None` or zero
    /// disables the timeout.
    pub job_timeout: Option<Duration>,
}

struct IdleWorker {
    worker: PooledWorker,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleWorker>,
    /// Workers currently alive, whether idle or running a job.
    live: usize,
    generation: u64,
    closed: bool,
}

pub struct WorkerPool {
    settings: PoolSettings,
    state: Mutex<PoolState>,
    notify: Notify,
}

impl WorkerPool {
    /// Create the pool and start its idle reaper. The minimum worker count is
    /// pre-warmed best-effort; beyond that, workers are spawned on demand.
    pub fn start(settings: PoolSettings) -> Arc<Self> {
        let mut idle = VecDeque::new();
        for _ in 0..settings.min_workers.min(settings.max_workers) {
            match PooledWorker::spawn(&settings.command, 0) {
                Ok(worker) => {
                    counter!("cartomill_pool_worker_spawned_total").increment(1);
                    idle.push_back(IdleWorker {
                        worker,
                        since: Instant::now(),
                    });
                }
                Err(err) => {
                    // Demand-driven spawning retries later.
                    warn!(
                        target = "application::pool",
                        op = "pool::start",
                        result = "error",
                        error_code = "prewarm_worker",
                        error = %err,
                        "Failed to pre-warm worker process"
                    );
                    break;
                }
            }
        }
        let live = idle.len();
        gauge!("cartomill_pool_idle").set(live as f64);

        let pool = Arc::new(Self {
            settings,
            state: Mutex::new(PoolState {
                idle,
                live,
                generation: 0,
                closed: false,
            }),
            notify: Notify::new(),
        });

        if !pool.settings.idle_timeout.is_zero() {
            spawn_reaper(&pool);
        }

        pool
    }

    pub(crate) fn job_timeout(&self) -> Option<Duration> {
        self.settings.job_timeout.filter(|t| !t.is_zero())
    }

    /// Take a worker: a validated idle one when available, a fresh spawn when
    /// below the ceiling, otherwise wait for a release.
    pub(crate) async fn acquire(&self) -> Result<PooledWorker, PoolError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PoolError::Closed);
                }

                while let Some(idle) = state.idle.pop_front() {
                    let mut worker = idle.worker;
                    if worker.generation == state.generation && worker.is_alive() {
                        gauge!("cartomill_pool_idle").set(state.idle.len() as f64);
                        return Ok(worker);
                    }
                    // Dead or stale; dropping kills the child. The freed slot
                    // may unblock another waiter.
                    state.live -= 1;
                    counter!("cartomill_pool_worker_retired_total").increment(1);
                    self.notify.notify_one();
                }
                gauge!("cartomill_pool_idle").set(0.0);

                if state.live < self.settings.max_workers {
                    state.live += 1;
                    let generation = state.generation;
                    drop(state);

                    match PooledWorker::spawn(&self.settings.command, generation) {
                        Ok(worker) => {
                            counter!("cartomill_pool_worker_spawned_total").increment(1);
                            debug!(
                                target = "application::pool",
                                op = "pool::acquire",
                                result = "spawned",
                                generation,
                                "Spawned worker process"
                            );
                            return Ok(worker);
                        }
                        Err(err) => {
                            let mut state = self.state.lock().await;
                            state.live -= 1;
                            drop(state);
                            self.notify.notify_one();
                            warn!(
                                target = "application::pool",
                                op = "pool::acquire",
                                result = "error",
                                error_code = "spawn_worker",
                                error = %err,
                                "Failed to spawn worker process"
                            );
                            return Err(PoolError::Spawn(err));
                        }
                    }
                }
            }
            notified.await;
        }
    }

    /// Return a worker after a job. Unhealthy workers and workers from a
    /// previous generation are destroyed instead of parked.
    pub(crate) async fn release(&self, worker: PooledWorker, healthy: bool) {
        let mut state = self.state.lock().await;
        let keep = healthy && !state.closed && worker.generation == state.generation;
        if keep {
            state.idle.push_back(IdleWorker {
                worker,
                since: Instant::now(),
            });
            gauge!("cartomill_pool_idle").set(state.idle.len() as f64);
        } else {
            state.live -= 1;
            counter!("cartomill_pool_worker_retired_total").increment(1);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Invalidate every current worker. In-flight jobs finish on their old
    /// worker, which is then destroyed on release rather than reused.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        let idle = std::mem::take(&mut state.idle);
        state.live -= idle.len();
        let generation = state.generation;
        drop(state);
        drop(idle);
        self.notify.notify_waiters();

        counter!("cartomill_pool_reset_total").increment(1);
        gauge!("cartomill_pool_idle").set(0.0);
        info!(
            target = "application::pool",
            op = "pool::reset",
            result = "ok",
            generation,
            "Worker pool reset; current workers invalidated"
        );
    }

    /// Close the pool: waiters fail with [`PoolError::Closed`] and idle
    /// workers are destroyed immediately.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.live -= idle.len();
        drop(state);
        drop(idle);
        self.notify.notify_waiters();

        gauge!("cartomill_pool_idle").set(0.0);
        info!(
            target = "application::pool",
            op = "pool::shutdown",
            result = "ok",
            "Worker pool shut down"
        );
    }

    /// Current idle worker count; used by tests and diagnostics.
    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    /// Current live worker count, idle plus busy.
    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live
    }

    /// Destroy idle workers whose last job finished longer than the idle
    /// timeout ago, keeping the configured minimum alive.
    async fn reap_idle(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.closed {
            return false;
        }

        let timeout = self.settings.idle_timeout;
        let min = self.settings.min_workers;
        let mut kept = VecDeque::with_capacity(state.idle.len());
        let mut live = state.live;
        let mut reaped = 0usize;
        // Oldest first; release pushes to the back.
        for idle in std::mem::take(&mut state.idle) {
            if live > min && idle.since.elapsed() >= timeout {
                live -= 1;
                reaped += 1;
            } else {
                kept.push_back(idle);
            }
        }
        state.idle = kept;
        state.live = live;
        gauge!("cartomill_pool_idle").set(state.idle.len() as f64);
        drop(state);

        if reaped > 0 {
            counter!("cartomill_pool_worker_retired_total").increment(reaped as u64);
            self.notify.notify_waiters();
            debug!(
                target = "application::pool",
                op = "pool::reap_idle",
                result = "ok",
                reaped,
                "Reaped idle worker processes"
            );
        }
        true
    }
}

/// Periodic idle reaper; holds only a weak handle so the pool can drop
/// without waiting for the task.
fn spawn_reaper(pool: &Arc<WorkerPool>) {
    let period = (pool.settings.idle_timeout / 2).max(MIN_REAP_PERIOD);
    let weak: Weak<WorkerPool> = Arc::downgrade(pool);
    tokio::spawn(async move {
        loop {
            sleep(period).await;
            let Some(pool) = weak.upgrade() else {
                break;
            };
            if !pool.reap_idle().await {
                break;
            }
        }
    });
}
