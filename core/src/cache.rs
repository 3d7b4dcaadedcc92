//! Read-through cache of replayed documents. Callers treat every failure as a cache miss.

use dd_document::Document;
use dd_queue::queue_id;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CacheError {
	#[error("cache backend error: {0}")]
	Backend(String),
}

/// Documents are keyed by drive and document id, drives themselves by their id alone.
#[async_trait]
pub trait DocumentCache: Send + Sync + 'static {
	async fn get_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
	) -> Result<Option<Document>, CacheError>;

	async fn set_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		document: &Document,
	) -> Result<(), CacheError>;

	/// Returns whether an entry was removed.
	async fn delete_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
	) -> Result<bool, CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryCache {
	documents: RwLock<HashMap<String, Document>>,
}

#[async_trait]
impl DocumentCache for MemoryCache {
	async fn get_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
	) -> Result<Option<Document>, CacheError> {
		Ok(self
			.documents
			.read()
			.await
			.get(&queue_id(drive_id, document_id))
			.cloned())
	}

	async fn set_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		document: &Document,
	) -> Result<(), CacheError> {
		self.documents
			.write()
			.await
			.insert(queue_id(drive_id, document_id), document.clone());

		Ok(())
	}

	async fn delete_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
	) -> Result<bool, CacheError> {
		Ok(self
			.documents
			.write()
			.await
			.remove(&queue_id(drive_id, document_id))
			.is_some())
	}
}

/// Used when caching is disabled in the config.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl DocumentCache for NoCache {
	async fn get_document(
		&self,
		_drive_id: &str,
		_document_id: Option<&str>,
	) -> Result<Option<Document>, CacheError> {
		Ok(None)
	}

	async fn set_document(
		&self,
		_drive_id: &str,
		_document_id: Option<&str>,
		_document: &Document,
	) -> Result<(), CacheError> {
		Ok(())
	}

	async fn delete_document(
		&self,
		_drive_id: &str,
		_document_id: Option<&str>,
	) -> Result<bool, CacheError> {
		Ok(false)
	}
}
