//! Store configuration
//!
//! A `StoreConfig` is built once (defaults, optional JSON file, CLI overrides)
//! and never changes after the store is constructed.

use crate::error::{DistKvError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Role of a store instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts client writes and replicates them to followers
    Leader,
    /// Only receives writes replicated from a leader
    Follower,
}

/// Configuration consumed by the server and the storage table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Mirror the table to a snapshot file
    pub persist: bool,
    pub role: Role,
    pub snapshot_path: PathBuf,
    pub listen_addr: String,
    /// Follower addresses; only used when `role` is `Leader`
    pub replica_addrs: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist: true,
            role: Role::Leader,
            snapshot_path: PathBuf::from("distkv.json"),
            listen_addr: "127.0.0.1:3108".to_string(),
            replica_addrs: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Non-persistent config, handy for followers and tests
    pub fn in_memory(role: Role, listen_addr: impl Into<String>) -> Self {
        Self {
            persist: false,
            role,
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: StoreConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check the config before a store is built from it
    pub fn validate(&self) -> Result<()> {
        if self.persist && self.snapshot_path.as_os_str().is_empty() {
            return Err(DistKvError::Config(
                "persistence is enabled but no snapshot path is set".to_string(),
            ));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(DistKvError::Config("listen address is empty".to_string()));
        }
        if let Some(addr) = self.replica_addrs.iter().find(|a| a.trim().is_empty()) {
            return Err(DistKvError::Config(format!("invalid replica address {:?}", addr)));
        }
        if self.role == Role::Follower && !self.replica_addrs.is_empty() {
            warn!(
                replicas = self.replica_addrs.len(),
                "follower configured with replica addresses, they will be ignored"
            );
        }
        Ok(())
    }

    /// Whether this store should spawn the replication subsystem
    pub fn replicates(&self) -> bool {
        self.role == Role::Leader && !self.replica_addrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert!(config.persist);
        assert_eq!(config.role, Role::Leader);
        assert!(!config.replicates());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"role": "leader", "persist": false, "replica_addrs": ["127.0.0.1:4001"]}}"#
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert!(!config.persist);
        assert_eq!(config.listen_addr, "127.0.0.1:3108");
        assert!(config.replicates());
    }

    #[test]
    fn test_validate_rejects_missing_snapshot_path() {
        let config = StoreConfig {
            snapshot_path: PathBuf::new(),
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(DistKvError::Config(_))));
    }

    #[test]
    fn test_follower_never_replicates() {
        let config = StoreConfig {
            role: Role::Follower,
            replica_addrs: vec!["127.0.0.1:4001".to_string()],
            ..StoreConfig::default()
        };
        config.validate().unwrap();
        assert!(!config.replicates());
    }
}
