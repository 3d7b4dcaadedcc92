use dd_document::{Document, DocumentHeader, Operation, OperationScope};

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{
	error::{Error, StorageError},
	pipeline::ProcessedOperations,
};

use super::{DriveStorage, UpdateCallback};

#[derive(Debug)]
struct StoredDrive {
	drive: Document,
	documents: HashMap<String, Document>,
}

/// Keeps everything in process, transactions are optimistic: a write is only committed when no
/// operation was appended to the document since the snapshot handed to the callback.
#[derive(Debug)]
pub struct MemoryStorage {
	drives: RwLock<HashMap<String, StoredDrive>>,
	transaction_retries: u32,
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new(5)
	}
}

fn lookup<'d>(
	drives: &'d HashMap<String, StoredDrive>,
	drive_id: &str,
	document_id: Option<&str>,
) -> Result<&'d Document, StorageError> {
	let stored = drives
		.get(drive_id)
		.ok_or_else(|| StorageError::DriveNotFound(drive_id.to_string()))?;

	match document_id {
		None => Ok(&stored.drive),
		Some(document_id) => {
			stored
				.documents
				.get(document_id)
				.ok_or_else(|| StorageError::DocumentNotFound {
					drive_id: drive_id.to_string(),
					document_id: document_id.to_string(),
				})
		}
	}
}

fn lookup_mut<'d>(
	drives: &'d mut HashMap<String, StoredDrive>,
	drive_id: &str,
	document_id: Option<&str>,
) -> Result<&'d mut Document, StorageError> {
	let stored = drives
		.get_mut(drive_id)
		.ok_or_else(|| StorageError::DriveNotFound(drive_id.to_string()))?;

	match document_id {
		None => Ok(&mut stored.drive),
		Some(document_id) => {
			stored
				.documents
				.get_mut(document_id)
				.ok_or_else(|| StorageError::DocumentNotFound {
					drive_id: drive_id.to_string(),
					document_id: document_id.to_string(),
				})
		}
	}
}

fn version(document: &Document) -> (usize, usize) {
	(
		document.operations.global.len(),
		document.operations.local.len(),
	)
}

fn append(document: &mut Document, operations: &[Operation], header: &DocumentHeader) {
	for operation in operations {
		if let Some(state) = &operation.resulting_state {
			document.state[operation.scope] = state.clone();
		}
		document.operations[operation.scope].push(operation.clone());
	}

	document.header = header.clone();
}

fn resulting_state(
	document: &Document,
	scope: OperationScope,
	index: u64,
	branch: &str,
) -> Option<Value> {
	document.operations[scope]
		.iter()
		.filter(|op| op.index == index && op.branch == branch)
		.max_by_key(|op| op.skip)
		.and_then(|op| op.resulting_state.clone())
}

impl MemoryStorage {
	#[must_use]
	pub fn new(transaction_retries: u32) -> Self {
		Self {
			drives: RwLock::default(),
			transaction_retries,
		}
	}

	async fn append_operations(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		operations: &[Operation],
		header: &DocumentHeader,
	) -> Result<(), StorageError> {
		let mut drives = self.drives.write().await;
		append(
			lookup_mut(&mut drives, drive_id, document_id)?,
			operations,
			header,
		);

		Ok(())
	}

	async fn transaction<'a>(
		&'a self,
		drive_id: &'a str,
		document_id: Option<&'a str>,
		mut callback: UpdateCallback<'a>,
	) -> Result<ProcessedOperations, Error> {
		for attempt in 0..=self.transaction_retries {
			let snapshot = lookup(&*self.drives.read().await, drive_id, document_id)?.clone();
			let snapshot_version = version(&snapshot);

			let processed = callback(snapshot).await?;

			let mut drives = self.drives.write().await;
			let stored = lookup_mut(&mut drives, drive_id, document_id)?;

			if version(stored) != snapshot_version {
				debug!(
					%drive_id,
					?document_id,
					%attempt,
					"Document changed during transaction, retrying;"
				);
				continue;
			}

			append(
				stored,
				&processed.operations_applied,
				&processed.document.header,
			);

			trace!(
				%drive_id,
				?document_id,
				operations = processed.operations_applied.len(),
				"Committed operations;"
			);

			return Ok(processed);
		}

		Err(StorageError::TransactionConflict.into())
	}
}

#[async_trait]
impl DriveStorage for MemoryStorage {
	async fn get_drives(&self) -> Result<Vec<String>, StorageError> {
		Ok(self.drives.read().await.keys().cloned().collect())
	}

	async fn check_drive_exists(&self, drive_id: &str) -> Result<bool, StorageError> {
		Ok(self.drives.read().await.contains_key(drive_id))
	}

	async fn get_drive(&self, drive_id: &str) -> Result<Document, StorageError> {
		lookup(&*self.drives.read().await, drive_id, None).cloned()
	}

	async fn create_drive(&self, drive_id: &str, drive: Document) -> Result<(), StorageError> {
		let mut drives = self.drives.write().await;
		if drives.contains_key(drive_id) {
			return Err(StorageError::DriveAlreadyExists(drive_id.to_string()));
		}

		drives.insert(
			drive_id.to_string(),
			StoredDrive {
				drive,
				documents: HashMap::new(),
			},
		);

		Ok(())
	}

	async fn delete_drive(&self, drive_id: &str) -> Result<(), StorageError> {
		self.drives
			.write()
			.await
			.remove(drive_id)
			.map(|_| ())
			.ok_or_else(|| StorageError::DriveNotFound(drive_id.to_string()))
	}

	async fn get_documents(&self, drive_id: &str) -> Result<Vec<String>, StorageError> {
		self.drives
			.read()
			.await
			.get(drive_id)
			.map(|stored| stored.documents.keys().cloned().collect())
			.ok_or_else(|| StorageError::DriveNotFound(drive_id.to_string()))
	}

	async fn check_document_exists(
		&self,
		drive_id: &str,
		document_id: &str,
	) -> Result<bool, StorageError> {
		Ok(self
			.drives
			.read()
			.await
			.get(drive_id)
			.is_some_and(|stored| stored.documents.contains_key(document_id)))
	}

	async fn get_document(
		&self,
		drive_id: &str,
		document_id: &str,
	) -> Result<Document, StorageError> {
		lookup(&*self.drives.read().await, drive_id, Some(document_id)).cloned()
	}

	async fn create_document(
		&self,
		drive_id: &str,
		document_id: &str,
		document: Document,
	) -> Result<(), StorageError> {
		let mut drives = self.drives.write().await;
		let stored = drives
			.get_mut(drive_id)
			.ok_or_else(|| StorageError::DriveNotFound(drive_id.to_string()))?;

		if stored.documents.contains_key(document_id) {
			return Err(StorageError::DocumentAlreadyExists {
				drive_id: drive_id.to_string(),
				document_id: document_id.to_string(),
			});
		}

		stored.documents.insert(document_id.to_string(), document);

		Ok(())
	}

	async fn delete_document(&self, drive_id: &str, document_id: &str) -> Result<(), StorageError> {
		self.drives
			.write()
			.await
			.get_mut(drive_id)
			.and_then(|stored| stored.documents.remove(document_id))
			.map(|_| ())
			.ok_or_else(|| StorageError::DocumentNotFound {
				drive_id: drive_id.to_string(),
				document_id: document_id.to_string(),
			})
	}

	async fn add_document_operations(
		&self,
		drive_id: &str,
		document_id: &str,
		operations: &[Operation],
		header: &DocumentHeader,
	) -> Result<(), StorageError> {
		self.append_operations(drive_id, Some(document_id), operations, header)
			.await
	}

	async fn add_drive_operations(
		&self,
		drive_id: &str,
		operations: &[Operation],
		header: &DocumentHeader,
	) -> Result<(), StorageError> {
		self.append_operations(drive_id, None, operations, header)
			.await
	}

	async fn add_document_operations_with_transaction<'a>(
		&'a self,
		drive_id: &'a str,
		document_id: &'a str,
		callback: UpdateCallback<'a>,
	) -> Result<ProcessedOperations, Error> {
		self.transaction(drive_id, Some(document_id), callback).await
	}

	async fn add_drive_operations_with_transaction<'a>(
		&'a self,
		drive_id: &'a str,
		callback: UpdateCallback<'a>,
	) -> Result<ProcessedOperations, Error> {
		self.transaction(drive_id, None, callback).await
	}

	async fn get_operation_resulting_state(
		&self,
		drive_id: &str,
		document_id: &str,
		scope: OperationScope,
		index: u64,
		branch: &str,
	) -> Result<Option<Value>, StorageError> {
		let drives = self.drives.read().await;

		lookup(&drives, drive_id, Some(document_id))
			.map(|document| resulting_state(document, scope, index, branch))
	}

	async fn get_drive_operation_resulting_state(
		&self,
		drive_id: &str,
		scope: OperationScope,
		index: u64,
		branch: &str,
	) -> Result<Option<Value>, StorageError> {
		let drives = self.drives.read().await;

		lookup(&drives, drive_id, None).map(|document| resulting_state(document, scope, index, branch))
	}
}
