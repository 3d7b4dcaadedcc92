//! Read model over the per scope histories of a drive and its documents, used by the listeners.

use dd_document::{Document, Operation, OperationScope, SynchronizationUnitInput, DEFAULT_BRANCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::drive::{DriveState, Node, DRIVE_DOCUMENT_TYPE};

/// Sync id of the global scope of the drive document itself.
pub const DRIVE_SYNC_ID: &str = "0";

const MATCH_ALL: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationUnit {
	pub sync_id: String,
	pub scope: OperationScope,
	pub branch: String,
	pub drive_id: String,
	/// Empty for the drive document.
	pub document_id: String,
	pub document_type: String,
	/// Number of entries in the scope history, `0` when it is empty.
	pub revision: u64,
	pub last_updated: DateTime<Utc>,
}

/// Every field left empty matches everything, `*` matches everything as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationUnitFilter {
	#[serde(default)]
	pub document_ids: Vec<String>,
	#[serde(default)]
	pub scopes: Vec<String>,
	#[serde(default)]
	pub branches: Vec<String>,
	#[serde(default)]
	pub document_types: Vec<String>,
}

fn matches(filter: &[String], value: &str) -> bool {
	filter.is_empty() || filter.iter().any(|item| item == MATCH_ALL || item == value)
}

impl SynchronizationUnitFilter {
	fn matches_document(&self, document_id: &str, document_type: &str) -> bool {
		matches(&self.document_ids, document_id) && matches(&self.document_types, document_type)
	}

	fn matches_unit(&self, unit: &SynchronizationUnitInput) -> bool {
		matches(&self.scopes, unit.scope.as_ref()) && matches(&self.branches, &unit.branch)
	}
}

/// A document and the units it is tracked under, before their revisions are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSource {
	/// Empty for the drive document.
	pub document_id: String,
	pub document_type: String,
	pub units: Vec<SynchronizationUnitInput>,
}

fn drive_unit() -> SynchronizationUnitInput {
	SynchronizationUnitInput {
		sync_id: DRIVE_SYNC_ID.to_string(),
		scope: OperationScope::Global,
		branch: DEFAULT_BRANCH.to_string(),
	}
}

impl UnitSource {
	/// Only the global scope of a drive is tracked.
	#[must_use]
	pub fn drive() -> Self {
		Self {
			document_id: String::new(),
			document_type: DRIVE_DOCUMENT_TYPE.to_string(),
			units: vec![drive_unit()],
		}
	}

	#[must_use]
	pub fn file(node: &Node) -> Self {
		Self {
			document_id: node.id.clone(),
			document_type: node.document_type.clone().unwrap_or_default(),
			units: node.synchronization_units.clone(),
		}
	}

	/// Source of the file node backing `document_id`.
	#[must_use]
	pub fn document(drive: &DriveState, document_id: &str) -> Option<Self> {
		drive
			.node(document_id)
			.filter(|node| node.is_file())
			.map(Self::file)
	}
}

/// The drive itself followed by its file nodes, keeping only the units `filter` selects.
#[must_use]
pub fn unit_sources(drive: &DriveState, filter: &SynchronizationUnitFilter) -> Vec<UnitSource> {
	std::iter::once(UnitSource::drive())
		.chain(drive.file_nodes().map(UnitSource::file))
		.filter(|source| filter.matches_document(&source.document_id, &source.document_type))
		.filter_map(|mut source| {
			source.units.retain(|unit| filter.matches_unit(unit));
			(!source.units.is_empty()).then_some(source)
		})
		.collect()
}

/// Finds the document tracked under `sync_id`.
#[must_use]
pub fn find_unit(drive: &DriveState, sync_id: &str) -> Option<(UnitSource, SynchronizationUnitInput)> {
	if sync_id == DRIVE_SYNC_ID {
		return Some((UnitSource::drive(), drive_unit()));
	}

	drive.file_nodes().find_map(|node| {
		node.synchronization_units
			.iter()
			.find(|unit| unit.sync_id == sync_id)
			.map(|unit| (UnitSource::file(node), unit.clone()))
	})
}

/// Unit of `drive_id` covering the history of `unit.scope` in `document`.
#[must_use]
pub fn resolve_unit(
	drive_id: &str,
	source: &UnitSource,
	unit: &SynchronizationUnitInput,
	document: &Document,
) -> SynchronizationUnit {
	let last = document.last_operation(unit.scope);

	SynchronizationUnit {
		sync_id: unit.sync_id.clone(),
		scope: unit.scope,
		branch: unit.branch.clone(),
		drive_id: drive_id.to_string(),
		document_id: source.document_id.clone(),
		document_type: source.document_type.clone(),
		revision: last.map_or(0, |op| op.index + 1),
		last_updated: last.map_or(document.header.last_modified, |op| op.timestamp),
	}
}

/// Units touched by freshly applied operations, one per scope and branch.
#[must_use]
pub fn touched_units(
	drive_id: &str,
	source: &UnitSource,
	applied: &[Operation],
) -> Vec<SynchronizationUnit> {
	let mut units: Vec<SynchronizationUnit> = vec![];

	for operation in applied {
		let Some(input) = source
			.units
			.iter()
			.find(|unit| unit.scope == operation.scope && unit.branch == operation.branch)
		else {
			continue;
		};

		let unit = SynchronizationUnit {
			sync_id: input.sync_id.clone(),
			scope: input.scope,
			branch: input.branch.clone(),
			drive_id: drive_id.to_string(),
			document_id: source.document_id.clone(),
			document_type: source.document_type.clone(),
			revision: operation.index + 1,
			last_updated: operation.timestamp,
		};

		match units.iter_mut().find(|known| known.sync_id == unit.sync_id) {
			Some(known) if known.revision < unit.revision => *known = unit,
			Some(_) => {}
			None => units.push(unit),
		}
	}

	units
}

/// Filter of [`operation_updates`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDataFilter {
	/// Only operations strictly newer than this timestamp.
	pub since: Option<DateTime<Utc>>,
	/// Only operations at or after this revision.
	pub from_revision: Option<u64>,
}

/// Wire form of an operation sent to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationUpdate {
	pub index: u64,
	pub skip: u64,
	#[serde(rename = "type")]
	pub kind: String,
	pub input: serde_json::Value,
	pub hash: String,
	pub timestamp: DateTime<Utc>,
}

impl From<&Operation> for OperationUpdate {
	fn from(operation: &Operation) -> Self {
		Self {
			index: operation.index,
			skip: operation.skip,
			kind: operation.kind.clone(),
			input: operation.input.clone(),
			hash: operation.hash.clone(),
			timestamp: operation.timestamp,
		}
	}
}

#[must_use]
pub fn operation_updates(
	document: &Document,
	unit: &SynchronizationUnitInput,
	filter: OperationDataFilter,
) -> Vec<OperationUpdate> {
	document.operations[unit.scope]
		.iter()
		.filter(|op| op.branch == unit.branch)
		.filter(|op| filter.since.map_or(true, |since| op.timestamp > since))
		.filter(|op| filter.from_revision.map_or(true, |revision| op.index >= revision))
		.map(OperationUpdate::from)
		.collect()
}
