#![allow(dead_code)]

use dd_document::{Action, Operation, OperationScope};
use dd_queue::{queue_id, EnqueuedJob, ServerDelegate, ADD_FILE, DELETE_NODE};

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::{sync::Mutex, time::sleep};

pub const DRIVE_ID: &str = "drive-1";
pub const FAIL: &str = "FAIL";

#[derive(Debug, Error)]
#[error("job rejected: {0}")]
pub struct FakeError(pub String);

/// Creates documents on `ADD_FILE` and records the order jobs are processed in.
#[derive(Debug, Default)]
pub struct FakeDelegate {
	pub documents: Mutex<HashSet<(String, String)>>,
	pub processed: Mutex<Vec<(String, Vec<String>)>>,
	pub delay: Duration,
}

impl FakeDelegate {
	pub fn with_delay(delay: Duration) -> Self {
		Self {
			delay,
			..Default::default()
		}
	}

	pub async fn create_document(&self, drive_id: &str, document_id: &str) {
		self.documents
			.lock()
			.await
			.insert((drive_id.to_string(), document_id.to_string()));
	}

	pub async fn processed_queues(&self) -> Vec<String> {
		self.processed
			.lock()
			.await
			.iter()
			.map(|(queue, _)| queue.clone())
			.collect()
	}
}

#[async_trait]
impl ServerDelegate for FakeDelegate {
	type Output = Vec<String>;
	type Error = FakeError;

	async fn check_document_exists(
		&self,
		drive_id: &str,
		document_id: &str,
	) -> Result<bool, Self::Error> {
		Ok(self
			.documents
			.lock()
			.await
			.contains(&(drive_id.to_string(), document_id.to_string())))
	}

	async fn process_operation_job(&self, job: &EnqueuedJob) -> Result<Self::Output, Self::Error> {
		if !self.delay.is_zero() {
			sleep(self.delay).await;
		}

		let kinds = job
			.operations
			.iter()
			.map(|op| op.kind.clone())
			.collect::<Vec<_>>();

		self.processed.lock().await.push((
			queue_id(&job.drive_id, job.document_id.as_deref()),
			kinds.clone(),
		));

		if kinds.iter().any(|kind| kind == FAIL) {
			return Err(FakeError(job.job_id.to_string()));
		}

		for document_id in job.added_files() {
			self.create_document(&job.drive_id, document_id).await;
		}

		Ok(kinds)
	}
}

pub fn operation(kind: &str, input: serde_json::Value, index: u64) -> Operation {
	Operation::from_action(&Action::new(kind, input, OperationScope::Global), index, 0)
}

pub fn add_file(id: &str, index: u64) -> Operation {
	operation(
		ADD_FILE,
		json!({ "id": id, "name": id, "documentType": "test/budget" }),
		index,
	)
}

pub fn delete_node(id: &str, index: u64) -> Operation {
	operation(DELETE_NODE, json!({ "id": id }), index)
}
