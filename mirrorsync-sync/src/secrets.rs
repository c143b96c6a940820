//! Resolution of credential references in the engine environment.
//!
//! A value of `env:NAME` is read from the daemon's environment, `file:/path`
//! from a file (trailing newline stripped). Anything else is passed through
//! literally. Resolved values are opaque and never logged.

use std::collections::BTreeMap;

use crate::error::SyncError;

/// Source of credential material for the engine's remotes.
pub trait SecretStore: Send + Sync {
    /// Resolve one configured value for the variable `name`.
    fn resolve(&self, name: &str, value: &str) -> Result<String, SyncError>;
}

/// Resolves `env:` and `file:` references from the local process.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn resolve(&self, name: &str, value: &str) -> Result<String, SyncError> {
        if let Some(var) = value.strip_prefix("env:") {
            return std::env::var(var).map_err(|e| SyncError::Secret {
                name: name.to_string(),
                reason: format!("environment variable {var}: {e}"),
            });
        }
        if let Some(path) = value.strip_prefix("file:") {
            let raw = std::fs::read_to_string(path).map_err(|e| SyncError::Secret {
                name: name.to_string(),
                reason: format!("{path}: {e}"),
            })?;
            return Ok(raw.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(value.to_string())
    }
}

/// Resolve every entry of `engine_env`, failing on the first bad reference.
pub fn resolve_env(
    configured: &BTreeMap<String, String>,
    store: &dyn SecretStore,
) -> Result<BTreeMap<String, String>, SyncError> {
    configured
        .iter()
        .map(|(name, value)| Ok((name.clone(), store.resolve(name, value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn literal_env_and_file_values() {
        let dir = TempDir::new().unwrap();
        let token = dir.path().join("token");
        fs::write(&token, "s3cr3t\n").unwrap();
        std::env::set_var("MIRRORSYNC_TEST_SECRET", "from-env");

        let mut configured = BTreeMap::new();
        configured.insert("A".to_string(), "plain".to_string());
        configured.insert("B".to_string(), "env:MIRRORSYNC_TEST_SECRET".to_string());
        configured.insert("C".to_string(), format!("file:{}", token.display()));

        let resolved = resolve_env(&configured, &EnvSecretStore).unwrap();
        assert_eq!(resolved["A"], "plain");
        assert_eq!(resolved["B"], "from-env");
        assert_eq!(resolved["C"], "s3cr3t");
    }

    #[test]
    fn missing_reference_names_the_variable() {
        let mut configured = BTreeMap::new();
        configured.insert(
            "RCLONE_DRIVE_TOKEN".to_string(),
            "env:MIRRORSYNC_TEST_DEFINITELY_UNSET".to_string(),
        );
        let err = resolve_env(&configured, &EnvSecretStore).unwrap_err();
        assert!(err.to_string().contains("RCLONE_DRIVE_TOKEN"));
    }
}
