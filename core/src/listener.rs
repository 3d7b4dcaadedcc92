//! Notifies the listeners of a drive about the synchronization units touched by new operations.

use std::{
	collections::HashMap,
	sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

use super::sync_units::SynchronizationUnit;

#[derive(Debug, Error)]
pub enum ListenerError {
	#[error("listener failed to accept revisions <drive_id='{drive_id}'>: {reason}")]
	Rejected { drive_id: String, reason: String },
}

/// What a listener reports back for one updated unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRevision {
	pub sync_id: String,
	pub revision: u64,
}

#[async_trait]
pub trait ListenerManager: Send + Sync + 'static {
	async fn update_synchronization_revisions(
		&self,
		drive_id: &str,
		units: &[SynchronizationUnit],
		force_sync: bool,
	) -> Result<Vec<ListenerRevision>, ListenerError>;
}

/// Keeps the latest revision of every unit it was told about.
#[derive(Debug, Default)]
pub struct MemoryListenerManager {
	revisions: RwLock<HashMap<(String, String), u64>>,
}

impl MemoryListenerManager {
	#[must_use]
	pub fn revision(&self, drive_id: &str, sync_id: &str) -> Option<u64> {
		self.revisions
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&(drive_id.to_string(), sync_id.to_string()))
			.copied()
	}
}

#[async_trait]
impl ListenerManager for MemoryListenerManager {
	async fn update_synchronization_revisions(
		&self,
		drive_id: &str,
		units: &[SynchronizationUnit],
		force_sync: bool,
	) -> Result<Vec<ListenerRevision>, ListenerError> {
		let mut revisions = self
			.revisions
			.write()
			.unwrap_or_else(PoisonError::into_inner);

		Ok(units
			.iter()
			.map(|unit| {
				let revision = revisions
					.entry((drive_id.to_string(), unit.sync_id.clone()))
					.or_default();
				*revision = (*revision).max(unit.revision);

				trace!(drive_id, sync_id = %unit.sync_id, revision, force_sync, "Listener revision updated;");

				ListenerRevision {
					sync_id: unit.sync_id.clone(),
					revision: *revision,
				}
			})
			.collect())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
	Syncing,
	Success,
	Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriveEvent {
	#[serde(rename_all = "camelCase")]
	SyncStatus {
		drive_id: String,
		status: SyncStatus,
		error: Option<String>,
	},
}

const EVENTS_CAPACITY: usize = 256;

/// Latest sync status per drive, every change is also broadcast as a [`DriveEvent`].
#[derive(Debug, Clone)]
pub struct SyncStatusTracker {
	statuses: Arc<RwLock<HashMap<String, SyncStatus>>>,
	events: broadcast::Sender<DriveEvent>,
}

impl Default for SyncStatusTracker {
	fn default() -> Self {
		let (events, _) = broadcast::channel(EVENTS_CAPACITY);

		Self {
			statuses: Arc::default(),
			events,
		}
	}
}

impl SyncStatusTracker {
	#[must_use]
	pub fn status(&self, drive_id: &str) -> Option<SyncStatus> {
		self.statuses
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(drive_id)
			.copied()
	}

	pub fn update(&self, drive_id: &str, status: SyncStatus, error: Option<String>) {
		self.statuses
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(drive_id.to_string(), status);

		// no subscribers is not an error
		let _ = self.events.send(DriveEvent::SyncStatus {
			drive_id: drive_id.to_string(),
			status,
			error,
		});
	}

	pub fn forget(&self, drive_id: &str) {
		self.statuses
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(drive_id);
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
		self.events.subscribe()
	}
}
