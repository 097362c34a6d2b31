//! File-based configuration loading

use super::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use std::fs;
use std::path::Path;

/// Load configuration from a file
///
/// TOML when the extension is `.toml`, JSON otherwise.
/// Returns the default config if the file doesn't exist.
pub fn load_from_file(path: &Path) -> BridgeResult<BridgeConfig> {
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        BridgeError::config_with_context(
            format!("Failed to read config file: {}", e),
            format!("Reading configuration from '{}'", path.display()),
        )
    })?;

    let config: BridgeConfig = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| {
            BridgeError::config_with_context(
                format!("Failed to parse TOML config: {}", e),
                format!("Deserializing TOML configuration from '{}'", path.display()),
            )
        })?,
        _ => serde_json::from_str(&content).map_err(|e| {
            BridgeError::config_with_context(
                format!("Failed to parse JSON config: {}", e),
                format!("Deserializing JSON configuration from '{}'", path.display()),
            )
        })?,
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeFormat;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_from_file(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("flowgen.toml");
        let config_toml = r#"
handshake_timeout_ms = 2500
probe_format = "bare"

[worker]
program = "python3"
args = ["-m", "engine.main"]
working_dir = "/srv/engine"

[settings]
target = "react"
typescript = true

[logging]
level = "debug"
format = "json"
"#;
        fs::write(&config_path, config_toml).unwrap();

        let config = load_from_file(&config_path).unwrap();
        assert_eq!(config.worker.program, "python3");
        assert_eq!(config.worker.args, vec!["-m", "engine.main"]);
        assert_eq!(config.handshake_timeout_ms, 2500);
        assert_eq!(config.probe_timeout_ms, 5000);
        assert_eq!(config.probe_format, ProbeFormat::Bare);
        assert_eq!(config.settings["target"], "react");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_from_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("flowgen.json");
        fs::write(
            &config_path,
            r#"{"worker":{"program":"./engine","env":{"PYTHONUNBUFFERED":"1"}},"probe_timeout_ms":750}"#,
        )
        .unwrap();

        let config = load_from_file(&config_path).unwrap();
        assert_eq!(config.worker.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(config.probe_timeout_ms, 750);
    }

    #[test]
    fn test_invalid_file_reports_context() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.json");
        fs::write(&config_path, "{ not json").unwrap();

        let err = load_from_file(&config_path).unwrap_err();
        assert_eq!(err.error_code(), "FLOWGEN_CONFIG");
        assert!(err.context().unwrap().contains("broken.json"));
    }
}
