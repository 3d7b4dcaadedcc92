//! The drive document: a tree of folder and file nodes, each file node backed by a child document.

use dd_document::{
	DocumentModel, ModelError, Operation, OperationScope, Scoped, Signal,
	SynchronizationUnitInput, DEFAULT_BRANCH,
};

use std::collections::HashSet;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

pub mod actions;

pub const DRIVE_DOCUMENT_TYPE: &str = "powerhouse/document-drive";

pub const ADD_FOLDER: &str = "ADD_FOLDER";
pub const ADD_FILE: &str = dd_queue::ADD_FILE;
pub const UPDATE_NODE: &str = "UPDATE_NODE";
pub const DELETE_NODE: &str = dd_queue::DELETE_NODE;
pub const COPY_NODE: &str = "COPY_NODE";
pub const SET_DRIVE_NAME: &str = "SET_DRIVE_NAME";
pub const SET_SHARING_TYPE: &str = "SET_SHARING_TYPE";
pub const SET_AVAILABLE_OFFLINE: &str = "SET_AVAILABLE_OFFLINE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
	Folder,
	File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
	pub id: String,
	pub name: String,
	pub kind: NodeKind,
	#[serde(default)]
	pub parent_folder: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub document_type: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub synchronization_units: Vec<SynchronizationUnitInput>,
}

impl Node {
	#[must_use]
	pub fn is_file(&self) -> bool {
		self.kind == NodeKind::File
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveState {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub icon: Option<String>,
	#[serde(default)]
	pub slug: Option<String>,
	#[serde(default)]
	pub nodes: Vec<Node>,
}

impl DriveState {
	#[must_use]
	pub fn node(&self, id: &str) -> Option<&Node> {
		self.nodes.iter().find(|node| node.id == id)
	}

	#[must_use]
	pub fn file_nodes(&self) -> impl Iterator<Item = &Node> {
		self.nodes.iter().filter(|node| node.is_file())
	}

	/// `id` and every node below it.
	fn subtree(&self, id: &str) -> HashSet<String> {
		let mut ids = HashSet::from([id.to_string()]);

		loop {
			let before = ids.len();
			for node in &self.nodes {
				if node
					.parent_folder
					.as_ref()
					.is_some_and(|parent| ids.contains(parent))
				{
					ids.insert(node.id.clone());
				}
			}

			if ids.len() == before {
				return ids;
			}
		}
	}

	fn ensure_new_node(&self, id: &str) -> Result<(), ModelError> {
		if self.node(id).is_some() {
			return Err(ModelError::Rejected(format!(
				"Node with id {id} already exists"
			)));
		}

		Ok(())
	}

	fn ensure_folder(&self, parent_folder: Option<&str>) -> Result<(), ModelError> {
		match parent_folder.map(|id| (id, self.node(id))) {
			None => Ok(()),
			Some((_, Some(node))) if node.kind == NodeKind::Folder => Ok(()),
			Some((id, _)) => Err(ModelError::Rejected(format!(
				"Parent folder with id {id} not found"
			))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveLocalState {
	pub sharing_type: String,
	pub available_offline: bool,
}

impl Default for DriveLocalState {
	fn default() -> Self {
		Self {
			sharing_type: "private".to_string(),
			available_offline: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFolderInput {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub parent_folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFileInput {
	pub id: String,
	pub name: String,
	pub document_type: String,
	#[serde(default)]
	pub parent_folder: Option<String>,
	#[serde(default)]
	pub synchronization_units: Vec<SynchronizationUnitInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeInput {
	pub id: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub parent_folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodeInput {
	pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyNodeInput {
	pub src_id: String,
	pub target_id: String,
	#[serde(default)]
	pub target_name: Option<String>,
	#[serde(default)]
	pub target_parent_folder: Option<String>,
	#[serde(default)]
	pub synchronization_units: Vec<SynchronizationUnitInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDriveNameInput {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSharingTypeInput {
	#[serde(rename = "type")]
	pub sharing_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAvailableOfflineInput {
	pub available_offline: bool,
}

/// Synchronization units given to a file node when its creating operation does not list any.
///
/// Derived from the document id, so replaying the operation always yields the same units.
#[must_use]
pub fn default_synchronization_units(document_id: &str) -> Vec<SynchronizationUnitInput> {
	[OperationScope::Global, OperationScope::Local]
		.into_iter()
		.map(|scope| SynchronizationUnitInput {
			sync_id: format!("{document_id}:{scope}"),
			scope,
			branch: DEFAULT_BRANCH.to_string(),
		})
		.collect()
}

fn parse<T: DeserializeOwned>(operation: &Operation) -> Result<T, ModelError> {
	serde_json::from_value(operation.input.clone()).map_err(|e| ModelError::InvalidInput {
		operation: operation.kind.clone(),
		reason: e.to_string(),
	})
}

fn with_state<T, F>(state: &mut Value, update: F) -> Result<(), ModelError>
where
	T: Serialize + DeserializeOwned,
	F: FnOnce(&mut T) -> Result<(), ModelError>,
{
	let mut typed = serde_json::from_value::<T>(state.clone())?;
	update(&mut typed)?;
	*state = serde_json::to_value(typed)?;

	Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DriveModel;

impl DriveModel {
	fn reduce_global(
		state: &mut DriveState,
		operation: &Operation,
		dispatch: &mut dyn FnMut(Signal),
	) -> Result<(), ModelError> {
		match operation.kind.as_str() {
			ADD_FOLDER => {
				let input = parse::<AddFolderInput>(operation)?;
				state.ensure_new_node(&input.id)?;
				state.ensure_folder(input.parent_folder.as_deref())?;

				state.nodes.push(Node {
					id: input.id,
					name: input.name,
					kind: NodeKind::Folder,
					parent_folder: input.parent_folder,
					document_type: None,
					synchronization_units: vec![],
				});
			}

			ADD_FILE => {
				let mut input = parse::<AddFileInput>(operation)?;
				state.ensure_new_node(&input.id)?;
				state.ensure_folder(input.parent_folder.as_deref())?;

				if input.synchronization_units.is_empty() {
					input.synchronization_units = default_synchronization_units(&input.id);
				}

				dispatch(Signal::CreateChildDocument {
					id: input.id.clone(),
					document_type: input.document_type.clone(),
					synchronization_units: input.synchronization_units.clone(),
				});

				state.nodes.push(Node {
					id: input.id,
					name: input.name,
					kind: NodeKind::File,
					parent_folder: input.parent_folder,
					document_type: Some(input.document_type),
					synchronization_units: input.synchronization_units,
				});
			}

			UPDATE_NODE => {
				let input = parse::<UpdateNodeInput>(operation)?;

				if let Some(parent) = input.parent_folder.as_deref() {
					state.ensure_folder(Some(parent))?;
					if state.subtree(&input.id).contains(parent) {
						return Err(ModelError::Rejected(format!(
							"Node {} can't be moved inside itself",
							input.id
						)));
					}
				}

				let node = state
					.nodes
					.iter_mut()
					.find(|node| node.id == input.id)
					.ok_or_else(|| {
						ModelError::Rejected(format!("Node with id {} not found", input.id))
					})?;

				if let Some(name) = input.name {
					node.name = name;
				}
				if input.parent_folder.is_some() {
					node.parent_folder = input.parent_folder;
				}
			}

			DELETE_NODE => {
				let input = parse::<DeleteNodeInput>(operation)?;
				if state.node(&input.id).is_none() {
					return Err(ModelError::Rejected(format!(
						"Node with id {} not found",
						input.id
					)));
				}

				let removed = state.subtree(&input.id);
				state.nodes.retain(|node| {
					if !removed.contains(&node.id) {
						return true;
					}

					if node.is_file() {
						dispatch(Signal::DeleteChildDocument {
							id: node.id.clone(),
						});
					}
					false
				});
			}

			COPY_NODE => {
				let mut input = parse::<CopyNodeInput>(operation)?;
				state.ensure_new_node(&input.target_id)?;
				state.ensure_folder(input.target_parent_folder.as_deref())?;

				let source = state.node(&input.src_id).cloned().ok_or_else(|| {
					ModelError::Rejected(format!("Node with id {} not found", input.src_id))
				})?;

				if source.is_file() {
					if input.synchronization_units.is_empty() {
						input.synchronization_units =
							default_synchronization_units(&input.target_id);
					}

					dispatch(Signal::CopyChildDocument {
						id: source.id.clone(),
						new_id: input.target_id.clone(),
						synchronization_units: input.synchronization_units.clone(),
					});
				} else {
					input.synchronization_units.clear();
				}

				state.nodes.push(Node {
					id: input.target_id,
					name: input.target_name.unwrap_or(source.name),
					kind: source.kind,
					parent_folder: input.target_parent_folder,
					document_type: source.document_type,
					synchronization_units: input.synchronization_units,
				});
			}

			SET_DRIVE_NAME => state.name = parse::<SetDriveNameInput>(operation)?.name,

			other => return Err(ModelError::UnsupportedOperation(other.to_string())),
		}

		Ok(())
	}

	fn reduce_local(state: &mut DriveLocalState, operation: &Operation) -> Result<(), ModelError> {
		match operation.kind.as_str() {
			SET_SHARING_TYPE => {
				state.sharing_type = parse::<SetSharingTypeInput>(operation)?.sharing_type;
			}
			SET_AVAILABLE_OFFLINE => {
				state.available_offline =
					parse::<SetAvailableOfflineInput>(operation)?.available_offline;
			}
			other => return Err(ModelError::UnsupportedOperation(other.to_string())),
		}

		Ok(())
	}
}

impl DocumentModel for DriveModel {
	fn document_type(&self) -> &str {
		DRIVE_DOCUMENT_TYPE
	}

	fn initial_state(&self) -> Scoped<Value> {
		Scoped::new(
			serde_json::to_value(DriveState::default()).unwrap_or_default(),
			serde_json::to_value(DriveLocalState::default()).unwrap_or_default(),
		)
	}

	fn reduce(
		&self,
		state: &mut Value,
		operation: &Operation,
		dispatch: &mut dyn FnMut(Signal),
	) -> Result<(), ModelError> {
		match operation.scope {
			OperationScope::Global => with_state::<DriveState, _>(state, |drive| {
				Self::reduce_global(drive, operation, dispatch)
			}),
			OperationScope::Local => with_state::<DriveLocalState, _>(state, |local| {
				Self::reduce_local(local, operation)
			}),
		}
	}
}
