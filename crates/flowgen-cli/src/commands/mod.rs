//! Command implementations

pub mod chat;
pub mod check;
pub mod probe;
pub mod run;

use anyhow::{Context, Result};
use flowgen_core::BridgeError;
use serde_json::Value;
use std::path::Path;

/// Read a JSON object from `path`
pub(crate) fn read_json_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    anyhow::ensure!(value.is_object(), "{} must contain a JSON object", path.display());
    Ok(value)
}

/// Turn a bridge failure into the message shown to the user
pub(crate) fn report(error: BridgeError) -> anyhow::Error {
    let message = error.user_message();
    tracing::debug!(code = error.error_code(), "{}", error);
    anyhow::Error::new(error).context(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_json_file_requires_object() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"target": "vue"}}"#).unwrap();
        assert_eq!(
            read_json_file(file.path()).unwrap(),
            serde_json::json!({"target": "vue"})
        );

        let mut list = tempfile::NamedTempFile::new().unwrap();
        write!(list, "[1, 2]").unwrap();
        assert!(read_json_file(list.path()).is_err());
    }

    #[test]
    fn test_report_keeps_code_and_user_text() {
        let error = report(BridgeError::transport("broken pipe"));
        assert!(error.to_string().contains("unavailable"));
        assert!(error.downcast_ref::<BridgeError>().is_some());
    }
}
