//! CartoCSS compiler boundary: the trait the executors call through and the
//! `carto` CLI adapter behind it.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to prepare scratch directory: {0}")]
    ScratchInit(io::Error),
    #[error("failed to write map document: {0}")]
    Io(io::Error),
    #[error("carto CLI unavailable: {0}")]
    NotFound(io::Error),
    /// Compiler diagnostics, verbatim as the CLI printed them
    /// (`<styleId>:<line>:<col> <description>` per line).
    #[error("{0}")]
    Rules(String),
    #[error("carto CLI invocation failed (exit {exit_code:?})")]
    Cli { exit_code: Option<i32> },
}

/// Compiler invocation knobs, resolved from settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOptions {
    pub cli_path: PathBuf,
    pub scratch_dir: PathBuf,
    /// Renderer API version passed to the compiler.
    pub mapnik_version: String,
}

/// One compile job: the serialized map document plus invocation knobs. The
/// whole request crosses the worker process boundary as JSON, so it carries
/// everything the far side needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    pub mml: Value,
    pub options: CompileOptions,
    /// Extra environment variables for the compiler process, as a string map.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub env: Value,
}

/// Turns a map document into renderer XML. Implementations are synchronous;
/// executors decide where the work runs.
pub trait CartoCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> Result<String, CompileError>;
}

/// Adapter shelling out to the `carto` CLI: the document is written to a
/// temporary `.mml` file, XML is read from stdout, diagnostics from stderr.
#[derive(Debug, Clone, Default)]
pub struct CartoCliCompiler;

impl CartoCompiler for CartoCliCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<String, CompileError> {
        let started_at = Instant::now();
        let options = &request.options;

        fs::create_dir_all(&options.scratch_dir).map_err(CompileError::ScratchInit)?;

        let mut input_file = tempfile::Builder::new()
            .suffix(".mml")
            .tempfile_in(&options.scratch_dir)
            .map_err(CompileError::Io)?;
        let document = serde_json::to_vec(&request.mml).map_err(io::Error::other)?;
        input_file.write_all(&document).map_err(CompileError::Io)?;
        input_file.flush().map_err(CompileError::Io)?;

        let mut command = Command::new(&options.cli_path);
        command
            .arg("--api")
            .arg(&options.mapnik_version)
            .arg(input_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = request.env.as_object() {
            for (key, value) in env {
                if let Some(value) = value.as_str() {
                    command.env(key, value);
                }
            }
        }

        let output = command.output().map_err(|err| {
            warn!(
                target = "application::compiler",
                op = "carto::compile",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "spawn_cli",
                error = %err,
                "Failed to spawn carto CLI"
            );
            if err.kind() == ErrorKind::NotFound {
                CompileError::NotFound(err)
            } else {
                CompileError::Io(err)
            }
        })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "application::compiler",
                op = "carto::compile",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "carto_cli",
                stderr = %stderr,
                "carto CLI invocation failed"
            );
            if stderr.is_empty() {
                return Err(CompileError::Cli { exit_code });
            }
            return Err(CompileError::Rules(stderr));
        }

        let xml = String::from_utf8_lossy(&output.stdout).into_owned();
        info!(
            target = "application::compiler",
            op = "carto::compile",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            xml_bytes = xml.len(),
            "Map document compiled via carto CLI"
        );

        Ok(xml)
    }
}

impl From<io::Error> for CompileError {
    fn from(err: io::Error) -> Self {
        CompileError::Io(err)
    }
}
