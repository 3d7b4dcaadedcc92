//! Persistence of drives, their documents and the append only operation histories.

use dd_document::{Document, DocumentHeader, Operation, OperationScope};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{
	error::{Error, StorageError},
	pipeline::ProcessedOperations,
};

pub mod memory;

pub use memory::MemoryStorage;

/// Computes the operations to append from the stored document, run inside a storage transaction.
///
/// Backends may call it again when the transaction has to be retried.
pub type UpdateCallback<'a> =
	Box<dyn FnMut(Document) -> BoxFuture<'a, Result<ProcessedOperations, Error>> + Send + 'a>;

#[async_trait]
pub trait DriveStorage: Send + Sync + 'static {
	async fn get_drives(&self) -> Result<Vec<String>, StorageError>;

	async fn check_drive_exists(&self, drive_id: &str) -> Result<bool, StorageError>;

	async fn get_drive(&self, drive_id: &str) -> Result<Document, StorageError>;

	async fn create_drive(&self, drive_id: &str, drive: Document) -> Result<(), StorageError>;

	/// Removes the drive along with all of its documents.
	async fn delete_drive(&self, drive_id: &str) -> Result<(), StorageError>;

	async fn get_documents(&self, drive_id: &str) -> Result<Vec<String>, StorageError>;

	async fn check_document_exists(
		&self,
		drive_id: &str,
		document_id: &str,
	) -> Result<bool, StorageError>;

	async fn get_document(&self, drive_id: &str, document_id: &str)
		-> Result<Document, StorageError>;

	async fn create_document(
		&self,
		drive_id: &str,
		document_id: &str,
		document: Document,
	) -> Result<(), StorageError>;

	async fn delete_document(&self, drive_id: &str, document_id: &str) -> Result<(), StorageError>;

	async fn add_document_operations(
		&self,
		drive_id: &str,
		document_id: &str,
		operations: &[Operation],
		header: &DocumentHeader,
	) -> Result<(), StorageError>;

	async fn add_drive_operations(
		&self,
		drive_id: &str,
		operations: &[Operation],
		header: &DocumentHeader,
	) -> Result<(), StorageError>;

	/// Backends without transactions read the document, run `callback` and write its result.
	async fn add_document_operations_with_transaction<'a>(
		&'a self,
		drive_id: &'a str,
		document_id: &'a str,
		mut callback: UpdateCallback<'a>,
	) -> Result<ProcessedOperations, Error> {
		let document = self.get_document(drive_id, document_id).await?;
		let processed = callback(document).await?;

		if !processed.operations_applied.is_empty() {
			self.add_document_operations(
				drive_id,
				document_id,
				&processed.operations_applied,
				&processed.document.header,
			)
			.await?;
		}

		Ok(processed)
	}

	async fn add_drive_operations_with_transaction<'a>(
		&'a self,
		drive_id: &'a str,
		mut callback: UpdateCallback<'a>,
	) -> Result<ProcessedOperations, Error> {
		let drive = self.get_drive(drive_id).await?;
		let processed = callback(drive).await?;

		if !processed.operations_applied.is_empty() {
			self.add_drive_operations(
				drive_id,
				&processed.operations_applied,
				&processed.document.header,
			)
			.await?;
		}

		Ok(processed)
	}

	/// Cached state after the operation at `index`, `None` when the backend did not keep it.
	async fn get_operation_resulting_state(
		&self,
		drive_id: &str,
		document_id: &str,
		scope: OperationScope,
		index: u64,
		branch: &str,
	) -> Result<Option<Value>, StorageError>;

	async fn get_drive_operation_resulting_state(
		&self,
		drive_id: &str,
		scope: OperationScope,
		index: u64,
		branch: &str,
	) -> Result<Option<Value>, StorageError>;
}
