use thiserror::Error;

use super::operation::OperationScope;

#[derive(Debug, Error)]
pub enum Error {
	#[error("document model not found: <type='{0}'>")]
	UnknownDocumentType(String),
	#[error(
		"Missing operations: expected {expected} with skip 0 or equivalent, got index {index} with skip {skip}"
	)]
	MissingOperations { expected: u64, index: u64, skip: u64 },
	#[error("The skip header operation index must be greater than or equal to {last_index}")]
	SkipHeaderIndex { last_index: u64 },
	#[error("invalid document name input for SET_NAME")]
	InvalidName,
	#[error("nothing to undo in the {0} scope")]
	NothingToUndo(OperationScope),

	#[error("failed to serialize document state: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Failure raised by a [`DocumentModel`](crate::DocumentModel) while reducing one operation.
#[derive(Debug, Error)]
pub enum ModelError {
	#[error("unsupported operation <type='{0}'>")]
	UnsupportedOperation(String),
	#[error("invalid input for operation <type='{operation}'>: {reason}")]
	InvalidInput { operation: String, reason: String },
	#[error("{0}")]
	Rejected(String),
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),
}
