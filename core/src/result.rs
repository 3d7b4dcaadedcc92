use dd_document::{Document, Operation, SignalResult};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::error::OperationError;

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
	Success,
	Conflict,
	Missing,
	Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOperationOptions {
	/// Forwarded to the listeners, defaults to syncing right away.
	pub force_sync: Option<bool>,
}

/// Outcome of applying a batch of operations to a drive or document.
///
/// `operations` holds what was applied and persisted, even when `error` reports that the batch
/// stopped early.
#[derive(Debug, Clone)]
pub struct OperationResult {
	pub status: UpdateStatus,
	pub error: Option<OperationError>,
	pub document: Option<Document>,
	pub operations: Vec<Operation>,
	pub signals: Vec<SignalResult>,
}

impl OperationResult {
	#[must_use]
	pub fn success(document: Document, operations: Vec<Operation>) -> Self {
		Self {
			status: UpdateStatus::Success,
			error: None,
			document: Some(document),
			operations,
			signals: vec![],
		}
	}

	#[must_use]
	pub fn is_success(&self) -> bool {
		self.status == UpdateStatus::Success
	}
}
