//! Pool worker process: reads line-delimited JSON job requests on stdin and
//! writes exactly one response line per request on stdout, in order. Exits
//! when stdin closes or stdout becomes unwritable.

use std::io::{self, BufRead, Write};

use cartomill::{
    application::{
        compiler::{CartoCliCompiler, CartoCompiler, CompileRequest},
        pool::proto::{JobAction, JobRequest, JobResponse, MigratePayload},
    },
    domain::migrate,
};
use serde_json::Value;

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JobRequest>(&line) {
            Ok(request) => handle(request),
            Err(err) => JobResponse::failure(format!("malformed job request: {err}")),
        };

        if write_response(&mut out, &response).is_err() {
            break;
        }
    }
}

fn handle(request: JobRequest) -> JobResponse {
    match request.action {
        JobAction::Migrate => match serde_json::from_value::<MigratePayload>(request.payload) {
            Ok(payload) => match migrate::migrate(&payload.style, &payload.from, &payload.to) {
                Ok(style) => JobResponse::success(Value::String(style)),
                Err(err) => JobResponse::failure(err.to_string()),
            },
            Err(err) => JobResponse::failure(format!("malformed migrate payload: {err}")),
        },
        JobAction::Compile => match serde_json::from_value::<CompileRequest>(request.payload) {
            Ok(compile) => match CartoCliCompiler.compile(&compile) {
                Ok(xml) => JobResponse::success(Value::String(xml)),
                Err(err) => JobResponse::failure(err.to_string()),
            },
            Err(err) => JobResponse::failure(format!("malformed compile payload: {err}")),
        },
    }
}

fn write_response(out: &mut impl Write, response: &JobResponse) -> io::Result<()> {
    let line = serde_json::to_string(response).map_err(io::Error::other)?;
    writeln!(out, "{line}")?;
    out.flush()
}
