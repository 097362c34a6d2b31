//! Worker environment check
//!
//! `flowgen-worker --check` prints a single JSON object describing its
//! environment and exits without starting a session.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::supervisor::build_command;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use tracing::{debug, instrument};

/// Flag that puts the worker in check mode
pub const CHECK_FLAG: &str = "--check";

/// Environment report printed by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDiagnostics {
    pub status: String,
    /// Whether the worker's indexing backend could be imported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llama_index_available: Option<bool>,
    /// Keys this version does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkerDiagnostics {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Parse the report from the worker's stdout; the last non-empty line wins
pub fn parse_diagnostics(stdout: &str) -> BridgeResult<WorkerDiagnostics> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| BridgeError::protocol("worker printed no diagnostics"))?;

    serde_json::from_str(line).map_err(|e| {
        BridgeError::protocol(format!("invalid diagnostics output: {}", e)).with_context(line)
    })
}

/// Run the configured worker in check mode, bounded by the handshake timeout
#[instrument(skip_all, fields(program = %config.worker.program))]
pub async fn check_environment(config: &BridgeConfig) -> BridgeResult<WorkerDiagnostics> {
    let mut worker = config.worker.clone();
    worker.args.push(CHECK_FLAG.to_string());

    let mut cmd = build_command(&worker);
    cmd.stdin(Stdio::null());

    let output = tokio::time::timeout(config.handshake_timeout(), cmd.output())
        .await
        .map_err(|_| {
            BridgeError::transport(format!(
                "worker check did not finish within {} ms",
                config.handshake_timeout_ms
            ))
        })?
        .map_err(|e| {
            BridgeError::transport(format!("Failed to run worker '{}': {}", worker.program, e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(
            BridgeError::transport(format!("worker check failed ({})", output.status))
                .with_context(stderr.trim().to_string()),
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("Worker check output: {}", stdout.trim());
    parse_diagnostics(&stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_report() {
        let report = parse_diagnostics("{\"status\":\"ok\",\"llamaIndexAvailable\":false}\n").unwrap();
        assert!(report.is_ok());
        assert_eq!(report.llama_index_available, Some(false));
        assert!(report.extra.is_empty());
    }

    #[test]
    fn test_parse_keeps_unknown_keys_and_uses_last_line() {
        let report = parse_diagnostics(
            "loading modules...\n{\"status\":\"degraded\",\"python\":\"3.11\"}\n\n",
        )
        .unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.llama_index_available, None);
        assert_eq!(report.extra.get("python"), Some(&Value::from("3.11")));
    }

    #[test]
    fn test_parse_failures_are_protocol_errors() {
        assert!(matches!(
            parse_diagnostics("   \n"),
            Err(BridgeError::Protocol { .. })
        ));
        let err = parse_diagnostics("not json").unwrap_err();
        assert_eq!(err.error_code(), "FLOWGEN_PROTOCOL");
        assert_eq!(err.context(), Some("not json"));
    }
}
