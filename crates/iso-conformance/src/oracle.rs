//! Canonicalization collaborators: something that turns a wire message into
//! the canonical JSON text the validator compares against.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::data::TestRow;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("canonicalization request failed: {0}")]
    Request(String),
    #[error("canonicalization service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("oracle command failed: status={status}, stderr={stderr}")]
    CommandFailed { status: i32, stderr: String },
    #[error("oracle is unavailable: {0}")]
    Unavailable(String),
    #[error("oracle response is not valid JSON: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub row_id: &'a str,
    pub wire: &'a str,
}

pub trait CanonicalOracle {
    fn name(&self) -> &'static str;

    /// Canonical JSON text for `request.wire`. Blocking.
    fn canonicalize(&self, request: &OracleRequest<'_>) -> Result<String, TransportError>;
}

#[derive(Debug, Serialize)]
struct WireEnvelope<'a> {
    message: &'a str,
}

/// Posts `{"message": <wire>}` to a parsing service and returns the body.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(TransportError::Unavailable(
                "HTTP oracle endpoint must not be empty".to_owned(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))?;
        Ok(Self { endpoint, client })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CanonicalOracle for HttpOracle {
    fn name(&self) -> &'static str {
        "http"
    }

    fn canonicalize(&self, request: &OracleRequest<'_>) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&WireEnvelope {
                message: request.wire,
            })
            .send()
            .map_err(|error| TransportError::Request(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|error| TransportError::Request(error.to_string()))?;
        if status.is_client_error() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

/// The `message` or `error` string of a JSON error body, else the raw body.
#[must_use]
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error"]
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Runs a local program with the wire on stdin and reads JSON from stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace-separated command line into program and arguments.
    pub fn from_command_line(line: &str) -> Result<Self, TransportError> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts
            .next()
            .ok_or_else(|| TransportError::Unavailable("oracle command is empty".to_owned()))?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl CanonicalOracle for CommandOracle {
    fn name(&self) -> &'static str {
        "command"
    }

    fn canonicalize(&self, request: &OracleRequest<'_>) -> Result<String, TransportError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|mut child| {
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(request.wire.as_bytes())?;
                }
                child.wait_with_output()
            })
            .map_err(|error| {
                TransportError::Unavailable(format!("{}: {error}", self.program))
            })?;

        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))
    }
}

/// Canned responses keyed by row id, for fixture runs.
#[derive(Debug, Clone, Default)]
pub struct RecordedOracle {
    responses: BTreeMap<String, Value>,
}

impl RecordedOracle {
    #[must_use]
    pub fn from_rows(rows: &[TestRow]) -> Self {
        let responses = rows
            .iter()
            .filter_map(|row| {
                row.canonical
                    .as_ref()
                    .map(|canonical| (row.row_id.clone(), canonical.clone()))
            })
            .collect();
        Self { responses }
    }

    pub fn insert(&mut self, row_id: impl Into<String>, canonical: Value) {
        self.responses.insert(row_id.into(), canonical);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl CanonicalOracle for RecordedOracle {
    fn name(&self) -> &'static str {
        "recorded"
    }

    fn canonicalize(&self, request: &OracleRequest<'_>) -> Result<String, TransportError> {
        let canonical = self.responses.get(request.row_id).ok_or_else(|| {
            TransportError::Unavailable(format!(
                "no recorded canonical response for row {}",
                request.row_id
            ))
        })?;
        serde_json::to_string(canonical)
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        CanonicalOracle, CommandOracle, OracleRequest, RecordedOracle, TransportError,
        error_message,
    };

    #[test]
    fn error_body_prefers_message_then_error_then_raw() {
        assert_eq!(error_message(r#"{"message": "bad bitmap"}"#), "bad bitmap");
        assert_eq!(error_message(r#"{"error": "unsupported MTI"}"#), "unsupported MTI");
        assert_eq!(error_message(r#"{"detail": 1}"#), r#"{"detail": 1}"#);
        assert_eq!(error_message(" plain failure \n"), "plain failure");
    }

    #[test]
    fn recorded_oracle_answers_known_rows_only() {
        let mut oracle = RecordedOracle::default();
        oracle.insert("row-1", json!({"a": 1}));
        let request = OracleRequest {
            row_id: "row-1",
            wire: "0100",
        };
        assert_eq!(oracle.canonicalize(&request).expect("recorded"), r#"{"a":1}"#);

        let missing = OracleRequest {
            row_id: "row-2",
            wire: "0100",
        };
        assert!(matches!(
            oracle.canonicalize(&missing),
            Err(TransportError::Unavailable(_))
        ));
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(CommandOracle::from_command_line("   ").is_err());
        let oracle = CommandOracle::from_command_line("parser --json").expect("command");
        assert_eq!(oracle.name(), "command");
    }

    #[cfg(unix)]
    #[test]
    fn command_oracle_reads_stdout_and_reports_failures() {
        let echo = CommandOracle::new("cat", Vec::new());
        let request = OracleRequest {
            row_id: "row-1",
            wire: r#"{"echo":true}"#,
        };
        assert_eq!(echo.canonicalize(&request).expect("cat"), r#"{"echo":true}"#);

        let failing = CommandOracle::new(
            "sh",
            vec!["-c".to_owned(), "cat >/dev/null; echo boom >&2; exit 3".to_owned()],
        );
        match failing.canonicalize(&request) {
            Err(TransportError::CommandFailed { status, stderr }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected command failure, got {other:?}"),
        }
    }
}
