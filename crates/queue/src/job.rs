use dd_document::{Action, Operation};

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

/// Drive operation creating a child document, its input `id` is the new document id.
pub const ADD_FILE: &str = "ADD_FILE";

/// Drive operation removing a node, its input `id` is the removed node (or document) id.
pub const DELETE_NODE: &str = "DELETE_NODE";

/// Identity of the queue serving a drive or one of its documents.
#[must_use]
pub fn queue_id(drive_id: &str, document_id: Option<&str>) -> String {
	document_id.map_or_else(
		|| drive_id.to_string(),
		|document_id| format!("{drive_id}:{document_id}"),
	)
}

/// Work submitted for one drive, or for one of its documents when `document_id` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
	pub drive_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub document_id: Option<String>,
	#[serde(default)]
	pub operations: Vec<Operation>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub actions: Vec<Action>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub force_sync: Option<bool>,
}

impl Job {
	pub fn operations(
		drive_id: impl Into<String>,
		document_id: Option<String>,
		operations: Vec<Operation>,
	) -> Self {
		Self {
			drive_id: drive_id.into(),
			document_id,
			operations,
			actions: vec![],
			force_sync: None,
		}
	}

	pub fn actions(
		drive_id: impl Into<String>,
		document_id: Option<String>,
		actions: Vec<Action>,
	) -> Self {
		Self {
			drive_id: drive_id.into(),
			document_id,
			operations: vec![],
			actions,
			force_sync: None,
		}
	}

	#[must_use]
	pub const fn with_force_sync(mut self, force_sync: Option<bool>) -> Self {
		self.force_sync = force_sync;
		self
	}

	fn node_ids<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a str> + 'a {
		self.operations
			.iter()
			.filter(move |op| op.kind == kind)
			.filter_map(Operation::input_id)
			.chain(
				self.actions
					.iter()
					.filter(move |action| action.kind == kind)
					.filter_map(Action::input_id),
			)
	}

	/// Ids of the documents created by this job.
	pub fn added_files(&self) -> impl Iterator<Item = &str> + '_ {
		self.node_ids(ADD_FILE)
	}

	/// Ids of the nodes removed by this job.
	pub fn deleted_nodes(&self) -> impl Iterator<Item = &str> + '_ {
		self.node_ids(DELETE_NODE)
	}

	#[must_use]
	pub fn adds_file(&self, document_id: &str) -> bool {
		self.added_files().any(|id| id == document_id)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedJob {
	pub job_id: JobId,
	#[serde(flatten)]
	pub job: Job,
}

impl EnqueuedJob {
	#[must_use]
	pub fn new(job: Job) -> Self {
		Self {
			job_id: Uuid::new_v4(),
			job,
		}
	}
}

impl Deref for EnqueuedJob {
	type Target = Job;

	fn deref(&self) -> &Self::Target {
		&self.job
	}
}
