//! Secret access for tool invocations.
//!
//! The engine never stores or logs credentials. A [`SecretStore`]
//! collaborator decrypts whatever a repository needs (passphrase, SSH
//! command) just-in-time into env entries that exist only in the spawned
//! process's environment block.

use std::collections::HashMap;
use thiserror::Error;

/// Env var carrying the repository passphrase to the tool.
pub const ENV_PASSPHRASE: &str = "BORG_PASSPHRASE";

/// Env var carrying the remote shell command (SSH options, key file) to the
/// tool for `ssh://` repositories.
pub const ENV_RSH: &str = "BORG_RSH";

/// Errors from secret resolution.
#[derive(Debug, Error)]
pub enum SecretError {
    /// No secret material is registered for the repository.
    #[error("no secret configured for repository '{0}'")]
    Missing(String),

    /// The stored secret could not be decrypted.
    #[error("failed to decrypt secret for repository '{repository}': {reason}")]
    Decrypt { repository: String, reason: String },
}

/// Just-in-time secret resolution for a repository.
pub trait SecretStore: Send + Sync {
    /// Returns the env entries the tool needs to open the repository.
    ///
    /// Called immediately before each spawn; implementations must not cache
    /// decrypted material longer than the call.
    fn tool_env(&self, repository: &str) -> Result<HashMap<String, String>, SecretError>;
}

/// Secret store reading per-repository entries registered in memory.
///
/// Stands in for the product's encrypted credential store, which is outside
/// the engine. The CLI populates it from environment variables.
#[derive(Default)]
pub struct StaticSecretStore {
    entries: HashMap<String, HashMap<String, String>>,
}

impl StaticSecretStore {
    /// Creates an empty store. Repositories without an entry get an empty
    /// env, which is valid for unencrypted repositories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a passphrase for a repository.
    pub fn with_passphrase(mut self, repository: impl Into<String>, passphrase: impl Into<String>) -> Self {
        self.entries
            .entry(repository.into())
            .or_default()
            .insert(ENV_PASSPHRASE.to_string(), passphrase.into());
        self
    }

    /// Registers a remote-shell command (e.g. `ssh -i /path/to/key`) for a
    /// repository reached over SSH.
    pub fn with_rsh(mut self, repository: impl Into<String>, rsh: impl Into<String>) -> Self {
        self.entries
            .entry(repository.into())
            .or_default()
            .insert(ENV_RSH.to_string(), rsh.into());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn tool_env(&self, repository: &str) -> Result<HashMap<String, String>, SecretError> {
        Ok(self.entries.get(repository).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_repository_gets_empty_env() {
        let store = StaticSecretStore::new();
        assert!(store.tool_env("anything").unwrap().is_empty());
    }

    #[test]
    fn registered_entries_are_returned() {
        let store = StaticSecretStore::new()
            .with_passphrase("main", "hunter2")
            .with_rsh("main", "ssh -i /keys/backup");

        let env = store.tool_env("main").unwrap();
        assert_eq!(env.get(ENV_PASSPHRASE).map(String::as_str), Some("hunter2"));
        assert_eq!(
            env.get(ENV_RSH).map(String::as_str),
            Some("ssh -i /keys/backup")
        );
        assert!(store.tool_env("other").unwrap().is_empty());
    }
}
