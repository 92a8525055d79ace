//! One pooled worker process and the request/response exchange over its
//! standard streams.

use std::{io, path::PathBuf, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
};

use super::proto::{JobRequest, JobResponse};

/// Program and arguments used to launch worker processes.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

/// Handle to a spawned worker. The child is killed when the handle drops, so
/// discarding one is enough to retire it.
#[derive(Debug)]
pub(crate) struct PooledWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Pool generation the worker was spawned under; a reset invalidates
    /// every earlier generation.
    pub(crate) generation: u64,
}

impl PooledWorker {
    pub(crate) fn spawn(command: &WorkerCommand, generation: u64) -> io::Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| io::Error::other("worker stdout not captured"))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            generation,
        })
    }

    /// Send one request line and read one response line. Any transport
    /// failure poisons the worker; callers must not reuse it afterwards.
    pub(crate) async fn run(&mut self, request: &JobRequest) -> io::Result<JobResponse> {
        let mut line = serde_json::to_string(request).map_err(io::Error::other)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let mut reply = String::new();
        let read = self.stdout.read_line(&mut reply).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "worker closed its output stream",
            ));
        }

        serde_json::from_str(reply.trim()).map_err(io::Error::other)
    }

    /// Whether the child process is still running.
    pub(crate) fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}
