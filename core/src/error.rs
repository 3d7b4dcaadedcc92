use dd_document::Operation;

use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

use super::result::UpdateStatus;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Synchronization unit not found <drive_id='{drive_id}', sync_id='{sync_id}'>")]
	SyncUnitNotFound { drive_id: String, sync_id: String },
	#[error("queued job failed: {0}")]
	JobFailed(Arc<Error>),

	#[error("failed to read config file <path='{}'>: {source}", .path.display())]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse config file <path='{}'>: {source}", .path.display())]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("invalid log directive: {0}")]
	LogDirective(#[from] tracing_subscriber::filter::ParseError),
	#[error("failed to install the tracing subscriber: {0}")]
	LogInit(#[from] tracing_subscriber::util::TryInitError),

	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Document(#[from] dd_document::Error),
	#[error(transparent)]
	Queue(#[from] dd_queue::Error),
	#[error(transparent)]
	Operation(#[from] OperationError),
}

impl Error {
	#[must_use]
	pub const fn is_not_found(&self) -> bool {
		matches!(
			self,
			Self::Storage(StorageError::DriveNotFound(_) | StorageError::DocumentNotFound { .. })
				| Self::SyncUnitNotFound { .. }
		)
	}
}

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Drive with id {0} not found")]
	DriveNotFound(String),
	#[error("Document with id {document_id} not found <drive_id='{drive_id}'>")]
	DocumentNotFound {
		drive_id: String,
		document_id: String,
	},
	#[error("Drive with id {0} already exists")]
	DriveAlreadyExists(String),
	#[error("Document with id {document_id} already exists <drive_id='{drive_id}'>")]
	DocumentAlreadyExists {
		drive_id: String,
		document_id: String,
	},
	#[error("transaction conflicted with a concurrent write")]
	TransactionConflict,
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// Failure of a single operation of a batch.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
	#[error("{message}")]
	Failed {
		status: UpdateStatus,
		operation: Option<Box<Operation>>,
		message: String,
	},
	/// The state reached by applying `incoming` on the stored history does not match its hash.
	#[error(
		"Conflicting operation on index {}:{}, expected hash {} but got {}",
		.incoming.index,
		.incoming.skip,
		.incoming.hash,
		.existing.hash
	)]
	Conflict {
		existing: Box<Operation>,
		incoming: Box<Operation>,
	},
}

impl OperationError {
	pub fn failed(status: UpdateStatus, operation: &Operation, message: impl Into<String>) -> Self {
		Self::Failed {
			status,
			operation: Some(Box::new(operation.clone())),
			message: message.into(),
		}
	}

	/// Reducer errors for `operation`, gaps in the history reported as missing operations.
	#[must_use]
	pub fn from_document(error: &dd_document::Error, operation: &Operation) -> Self {
		let status = match error {
			dd_document::Error::MissingOperations { .. } => UpdateStatus::Missing,
			_ => UpdateStatus::Error,
		};

		Self::failed(status, operation, error.to_string())
	}

	#[must_use]
	pub const fn status(&self) -> UpdateStatus {
		match self {
			Self::Failed { status, .. } => *status,
			Self::Conflict { .. } => UpdateStatus::Conflict,
		}
	}

	#[must_use]
	pub fn operation(&self) -> Option<&Operation> {
		match self {
			Self::Failed { operation, .. } => operation.as_deref(),
			Self::Conflict { incoming, .. } => Some(incoming),
		}
	}
}
