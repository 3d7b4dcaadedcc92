//! Drive server configuration, loaded from a TOML file where every field is optional.
//!
//! ```toml
//! [queue]
//! workers = 3
//! timeout_ms = 0
//! backend = { type = "redis", url = "redis://127.0.0.1/" }
//!
//! [storage]
//! transaction_retries = 5
//!
//! [log]
//! directive = "info,dd_core=debug"
//! directory = "/var/log/drive-server"
//! ```

use dd_queue::ManagerConfig;

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveServerConfig {
	pub queue: QueueConfig,
	pub storage: StorageConfig,
	pub cache: CacheConfig,
	pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
	pub workers: usize,
	/// Poll interval of idle workers in milliseconds, `0` retries right away.
	pub timeout_ms: u64,
	pub backend: QueueBackend,
}

impl Default for QueueConfig {
	fn default() -> Self {
		let ManagerConfig { workers, timeout } = ManagerConfig::default();

		Self {
			workers,
			timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
			backend: QueueBackend::Memory,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueBackend {
	#[default]
	Memory,
	Redis {
		url: String,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
	/// How many times a conflicting storage transaction is replayed before giving up.
	pub transaction_retries: u32,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			transaction_retries: 5,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	pub enabled: bool,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self { enabled: true }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
	/// Used when `RUST_LOG` is not set.
	pub directive: String,
	/// Daily rolling log files are written here when set.
	pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			directive: "info,dd_core=debug,dd_queue=debug".to_string(),
			directory: None,
		}
	}
}

impl DriveServerConfig {
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();

		let contents = fs::read_to_string(path)
			.await
			.map_err(|source| Error::ConfigRead {
				path: path.to_path_buf(),
				source,
			})?;

		let config = toml::from_str(&contents).map_err(|source| Error::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;

		debug!(path = %path.display(), ?config, "Loaded drive server config;");

		Ok(config)
	}

	#[must_use]
	pub const fn manager_config(&self) -> ManagerConfig {
		ManagerConfig {
			workers: self.queue.workers,
			timeout: Duration::from_millis(self.queue.timeout_ms),
		}
	}
}
