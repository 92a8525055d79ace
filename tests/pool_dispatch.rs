#![cfg(unix)]

//! Worker pool and dispatcher behavior against the real worker binary and
//! against scripted stand-ins for misbehaving workers.

use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf, sync::Arc, time::Duration};

use cartomill::application::pool::{
    DispatchError, PoolError, PoolSettings, WorkerCommand, WorkerPool, dispatch,
    proto::JobRequest,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cartomill-worker"))
}

fn pool_settings(program: PathBuf) -> PoolSettings {
    PoolSettings {
        command: WorkerCommand::new(program),
        min_workers: 0,
        max_workers: 2,
        idle_timeout: Duration::from_secs(300),
        job_timeout: Some(Duration::from_secs(5)),
    }
}

fn script_worker(dir: &TempDir, script: &str) -> PathBuf {
    let path = dir.path().join("fake-worker");
    fs::write(&path, script).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

#[tokio::test]
async fn migrate_job_round_trips_through_a_worker() {
    let pool = WorkerPool::start(pool_settings(worker_binary()));

    let request = JobRequest::migrate("#t { marker-width:10; }", "2.0.0", "2.1.0");
    let result = dispatch(&pool, &request).await.expect("migrated");
    let migrated = result.as_str().expect("text result");
    assert!(migrated.contains("marker-width:20"), "{migrated}");
    assert!(migrated.contains("mapnik::geometry_type"), "{migrated}");

    // The worker survives the job and is parked for reuse.
    assert_eq!(pool.idle_count().await, 1);
    assert_eq!(pool.live_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn job_failures_carry_the_worker_message_verbatim() {
    let pool = WorkerPool::start(pool_settings(worker_binary()));

    let request = JobRequest::migrate("#t {}", "1.0.0", "2.1.0");
    let err = dispatch(&pool, &request).await.expect_err("no path");
    match err {
        DispatchError::Job(message) => {
            assert_eq!(message, "no migration path from `1.0.0` to `2.1.0`");
        }
        other => panic!("unexpected error variant: {other:?}"),
    }

    // A job-level failure is not a worker failure; it stays pooled.
    assert_eq!(pool.idle_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn workers_are_reused_across_jobs() {
    let pool = WorkerPool::start(pool_settings(worker_binary()));

    for _ in 0..3 {
        let request = JobRequest::migrate("#t { line-width: 1; }", "2.3.0", "3.0.12");
        dispatch(&pool, &request).await.expect("migrated");
    }

    assert_eq!(pool.live_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn slow_jobs_hit_the_timeout_and_destroy_the_worker() {
    let dir = TempDir::new().expect("temp dir");
    let program = script_worker(
        &dir,
        r#"#!/bin/sh
read line
sleep 10
echo '{"result":"late"}'
"#,
    );

    let mut settings = pool_settings(program);
    settings.job_timeout = Some(Duration::from_millis(200));
    let pool = WorkerPool::start(settings);

    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    let err = dispatch(&pool, &request).await.expect_err("timeout");
    match err {
        DispatchError::Timeout { timeout_ms } => assert_eq!(timeout_ms, 200),
        other => panic!("unexpected error variant: {other:?}"),
    }

    // The wedged worker was destroyed, freeing its slot.
    assert_eq!(pool.live_count().await, 0);

    // The pool stays usable: a follow-up job gets a fresh worker and its
    // own deadline instead of hanging on the destroyed one.
    let err = dispatch(&pool, &request).await.expect_err("timeout again");
    assert!(matches!(err, DispatchError::Timeout { .. }), "{err:?}");
    assert_eq!(pool.live_count().await, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn disabled_timeout_lets_slow_jobs_resolve() {
    let dir = TempDir::new().expect("temp dir");
    let program = script_worker(
        &dir,
        r#"#!/bin/sh
read line
sleep 1
echo '{"result":"late but fine"}'
"#,
    );

    let mut settings = pool_settings(program);
    settings.job_timeout = None;
    let pool = WorkerPool::start(settings);

    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    let result = dispatch(&pool, &request).await.expect("resolved");
    assert_eq!(result.as_str(), Some("late but fine"));

    pool.shutdown().await;
}

#[tokio::test]
async fn empty_reply_is_no_output_but_keeps_the_worker() {
    let dir = TempDir::new().expect("temp dir");
    let program = script_worker(
        &dir,
        r#"#!/bin/sh
while read line; do
  echo '{}'
done
"#,
    );

    let pool = WorkerPool::start(pool_settings(program));

    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    let err = dispatch(&pool, &request).await.expect_err("empty reply");
    assert!(matches!(err, DispatchError::NoOutput), "{err:?}");

    // The reply was well-formed, so the worker remains usable.
    assert_eq!(pool.idle_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn worker_death_mid_job_is_no_output_and_frees_the_slot() {
    let dir = TempDir::new().expect("temp dir");
    let program = script_worker(
        &dir,
        r#"#!/bin/sh
read line
exit 0
"#,
    );

    let pool = WorkerPool::start(pool_settings(program));

    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    let err = dispatch(&pool, &request).await.expect_err("dead worker");
    assert!(matches!(err, DispatchError::NoOutput), "{err:?}");
    assert_eq!(pool.live_count().await, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_surfaces_as_unable_to_generate_output() {
    let dir = TempDir::new().expect("temp dir");
    let pool = WorkerPool::start(pool_settings(dir.path().join("missing-worker")));

    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    let err = dispatch(&pool, &request).await.expect_err("spawn failure");
    match &err {
        DispatchError::Failed {
            source: PoolError::Spawn(_),
        } => {}
        other => panic!("unexpected error variant: {other:?}"),
    }
    assert_eq!(err.to_string(), "unable to generate output");
    assert_eq!(pool.live_count().await, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn reset_invalidates_idle_workers() {
    let pool = WorkerPool::start(pool_settings(worker_binary()));

    let request = JobRequest::migrate("#t { line-width: 1; }", "2.3.0", "3.0.12");
    dispatch(&pool, &request).await.expect("migrated");
    assert_eq!(pool.idle_count().await, 1);

    pool.reset().await;
    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(pool.live_count().await, 0);

    // The pool recovers by spawning fresh workers on demand.
    dispatch(&pool, &request).await.expect("migrated after reset");
    assert_eq!(pool.live_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_rejects_new_jobs() {
    let pool = WorkerPool::start(pool_settings(worker_binary()));
    pool.shutdown().await;

    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    let err = dispatch(&pool, &request).await.expect_err("closed pool");
    assert!(
        matches!(
            err,
            DispatchError::Failed {
                source: PoolError::Closed,
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn minimum_workers_are_prewarmed_and_survive_reaping() {
    let mut settings = pool_settings(worker_binary());
    settings.min_workers = 1;
    settings.idle_timeout = Duration::from_millis(100);
    let pool = WorkerPool::start(settings);

    assert_eq!(pool.idle_count().await, 1);
    assert_eq!(pool.live_count().await, 1);

    // The reaper never drops the pool below its minimum.
    sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.live_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn idle_workers_are_reaped_after_the_idle_timeout() {
    let mut settings = pool_settings(worker_binary());
    settings.idle_timeout = Duration::from_millis(100);
    let pool = WorkerPool::start(settings);

    let request = JobRequest::migrate("#t { line-width: 1; }", "2.3.0", "3.0.12");
    dispatch(&pool, &request).await.expect("migrated");
    assert_eq!(pool.idle_count().await, 1);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(pool.live_count().await, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn concurrent_jobs_respect_the_worker_ceiling() {
    let mut settings = pool_settings(worker_binary());
    settings.max_workers = 1;
    let pool = WorkerPool::start(settings);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let request = JobRequest::migrate("#t { marker-width:10; }", "2.0.0", "2.1.0");
            dispatch(&pool, &request).await
        }));
    }

    for handle in handles {
        let result = handle.await.expect("task").expect("migrated");
        assert!(result.as_str().expect("text").contains("marker-width:20"));
    }

    assert_eq!(pool.live_count().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn malformed_request_lines_get_error_replies() {
    // Drive the worker binary directly to check its protocol handling.
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut child = tokio::process::Command::new(worker_binary())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn worker");

    let mut stdin = child.stdin.take().expect("stdin");
    let mut stdout = BufReader::new(child.stdout.take().expect("stdout"));

    stdin
        .write_all(b"this is not json\n")
        .await
        .expect("write");
    stdin.flush().await.expect("flush");

    let mut line = String::new();
    stdout.read_line(&mut line).await.expect("read");
    let reply: serde_json::Value = serde_json::from_str(line.trim()).expect("json reply");
    let message = reply["error"].as_str().expect("error message");
    assert!(message.contains("malformed job request"), "{message}");
    assert_eq!(reply.get("result"), None);

    // A bad line does not kill the worker; the next job still works.
    let request =
        serde_json::to_string(&JobRequest::migrate("#t { marker-width:10; }", "2.0.0", "2.1.0"))
            .expect("serialize");
    stdin
        .write_all(format!("{request}\n").as_bytes())
        .await
        .expect("write");
    stdin.flush().await.expect("flush");

    line.clear();
    stdout.read_line(&mut line).await.expect("read");
    let reply: serde_json::Value = serde_json::from_str(line.trim()).expect("json reply");
    assert!(
        reply["result"]
            .as_str()
            .expect("result")
            .contains("marker-width:20"),
        "{reply}"
    );

    drop(stdin);
    let status = child.wait().await.expect("wait");
    assert!(status.success(), "worker exit: {status}");
}

#[tokio::test]
async fn migrate_payload_shape_matches_the_protocol() {
    let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
    assert_eq!(
        request.payload,
        json!({ "style": "#t {}", "from": "2.0.0", "to": "2.1.0" })
    );
}
