use serde::{Deserialize, Serialize};

use super::{document::Document, operation::OperationScope};

/// Scope and branch of a child document's history tracked for replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationUnitInput {
	pub sync_id: String,
	pub scope: OperationScope,
	pub branch: String,
}

/// Side effect requested by a model while reducing an operation.
///
/// Signals are only collected during reduction, the drive server runs them after the reducer
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "input", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
	CreateChildDocument {
		id: String,
		#[serde(rename = "documentType")]
		document_type: String,
		#[serde(default, rename = "synchronizationUnits")]
		synchronization_units: Vec<SynchronizationUnitInput>,
	},
	DeleteChildDocument {
		id: String,
	},
	CopyChildDocument {
		id: String,
		#[serde(rename = "newId")]
		new_id: String,
		#[serde(default, rename = "synchronizationUnits")]
		synchronization_units: Vec<SynchronizationUnitInput>,
	},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
	pub signal: Signal,
	/// The document created by the signal, if any.
	pub result: Option<Document>,
}
