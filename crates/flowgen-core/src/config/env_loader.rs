//! Environment variable overrides

use super::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use std::path::PathBuf;

/// Worker executable path
pub const ENV_WORKER_PATH: &str = "FLOWGEN_WORKER_PATH";
/// Worker working directory
pub const ENV_WORKER_CWD: &str = "FLOWGEN_WORKER_CWD";
/// Handshake timeout in milliseconds
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "FLOWGEN_HANDSHAKE_TIMEOUT_MS";
/// Probe timeout in milliseconds
pub const ENV_PROBE_TIMEOUT_MS: &str = "FLOWGEN_PROBE_TIMEOUT_MS";

/// Apply overrides read through `lookup`
pub(super) fn apply_overrides<F>(config: &mut BridgeConfig, lookup: F) -> BridgeResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(program) = lookup(ENV_WORKER_PATH) {
        config.worker.program = program;
    }

    if let Some(dir) = lookup(ENV_WORKER_CWD) {
        config.worker.working_dir = Some(PathBuf::from(dir));
    }

    if let Some(raw) = lookup(ENV_HANDSHAKE_TIMEOUT_MS) {
        config.handshake_timeout_ms = parse_millis(ENV_HANDSHAKE_TIMEOUT_MS, &raw)?;
    }

    if let Some(raw) = lookup(ENV_PROBE_TIMEOUT_MS) {
        config.probe_timeout_ms = parse_millis(ENV_PROBE_TIMEOUT_MS, &raw)?;
    }

    Ok(())
}

fn parse_millis(key: &str, raw: &str) -> BridgeResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| BridgeError::config(format!("Invalid {} value: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = BridgeConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                (ENV_WORKER_PATH, "/usr/local/bin/engine"),
                (ENV_WORKER_CWD, "/tmp/project"),
                (ENV_PROBE_TIMEOUT_MS, " 1200 "),
            ]),
        )
        .unwrap();

        assert_eq!(config.worker.program, "/usr/local/bin/engine");
        assert_eq!(config.worker.working_dir, Some(PathBuf::from("/tmp/project")));
        assert_eq!(config.probe_timeout_ms, 1200);
        assert_eq!(config.handshake_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let mut config = BridgeConfig::default();
        let err = apply_overrides(
            &mut config,
            lookup_from(&[(ENV_HANDSHAKE_TIMEOUT_MS, "soon")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains(ENV_HANDSHAKE_TIMEOUT_MS));
    }
}
