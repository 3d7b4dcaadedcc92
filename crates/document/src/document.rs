use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoEnumIterator;

use super::{
	error::Error,
	helpers,
	operation::{Operation, OperationScope, Scoped},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHeader {
	pub document_type: String,
	pub name: String,
	pub created: DateTime<Utc>,
	pub last_modified: DateTime<Utc>,
	pub revision: Scoped<u64>,
}

impl DocumentHeader {
	pub fn new(document_type: impl Into<String>, name: impl Into<String>) -> Self {
		let now = Utc::now();

		Self {
			document_type: document_type.into(),
			name: name.into(),
			created: now,
			last_modified: now,
			revision: Scoped::default(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
	#[serde(flatten)]
	pub header: DocumentHeader,
	pub initial_state: Scoped<Value>,
	pub state: Scoped<Value>,
	pub operations: Scoped<Vec<Operation>>,
}

impl Document {
	#[must_use]
	pub fn document_type(&self) -> &str {
		&self.header.document_type
	}

	#[must_use]
	pub fn last_operation(&self, scope: OperationScope) -> Option<&Operation> {
		self.operations[scope].iter().max_by_key(|op| (op.index, op.skip))
	}

	/// Index the next operation appended to `scope` would take.
	#[must_use]
	pub fn next_index(&self, scope: OperationScope) -> u64 {
		self.operations[scope]
			.iter()
			.map(|op| op.index)
			.max()
			.map_or(0, |last| last + 1)
	}

	/// The per-scope operation history without the placeholders of skipped entries.
	#[must_use]
	pub fn cleaned_operations(&self, scope: OperationScope) -> Vec<Operation> {
		helpers::garbage_collect(&helpers::sort_operations(&self.operations[scope]))
	}

	/// Drops the entries invalidated by skips, leaving one entry per index with `NOOP`
	/// placeholders in place of the skipped ones.
	pub fn compact_operations(&mut self) -> Result<(), Error> {
		for scope in OperationScope::iter() {
			let initial_hash = hash_state(&self.initial_state[scope])?;
			let cleaned = self.cleaned_operations(scope);
			self.operations[scope] =
				helpers::expand_skipped_operations(&cleaned, scope, &initial_hash);
		}

		Ok(())
	}
}

/// Content hash of one scope state, used to detect conflicting histories.
pub fn hash_state(state: &Value) -> Result<String, Error> {
	let bytes = serde_json::to_vec(state)?;

	Ok(blake3::hash(&bytes).to_hex().to_string())
}
