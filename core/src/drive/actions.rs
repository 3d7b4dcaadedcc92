//! Builders for the drive document actions.

use dd_document::{Action, OperationScope};

use serde_json::{json, Value};

use super::{
	default_synchronization_units, ADD_FILE, ADD_FOLDER, COPY_NODE, DELETE_NODE,
	SET_AVAILABLE_OFFLINE, SET_DRIVE_NAME, SET_SHARING_TYPE, UPDATE_NODE,
};

fn global(kind: &str, input: Value) -> Action {
	Action::new(kind, input, OperationScope::Global)
}

#[must_use]
pub fn add_folder(id: &str, name: &str, parent_folder: Option<&str>) -> Action {
	global(
		ADD_FOLDER,
		json!({ "id": id, "name": name, "parentFolder": parent_folder }),
	)
}

#[must_use]
pub fn add_file(id: &str, name: &str, document_type: &str, parent_folder: Option<&str>) -> Action {
	global(
		ADD_FILE,
		json!({
			"id": id,
			"name": name,
			"documentType": document_type,
			"parentFolder": parent_folder,
			"synchronizationUnits": default_synchronization_units(id),
		}),
	)
}

#[must_use]
pub fn update_node(id: &str, name: Option<&str>, parent_folder: Option<&str>) -> Action {
	global(
		UPDATE_NODE,
		json!({ "id": id, "name": name, "parentFolder": parent_folder }),
	)
}

#[must_use]
pub fn delete_node(id: &str) -> Action {
	global(DELETE_NODE, json!({ "id": id }))
}

#[must_use]
pub fn copy_node(
	src_id: &str,
	target_id: &str,
	target_name: Option<&str>,
	target_parent_folder: Option<&str>,
) -> Action {
	global(
		COPY_NODE,
		json!({
			"srcId": src_id,
			"targetId": target_id,
			"targetName": target_name,
			"targetParentFolder": target_parent_folder,
			"synchronizationUnits": default_synchronization_units(target_id),
		}),
	)
}

#[must_use]
pub fn set_drive_name(name: &str) -> Action {
	global(SET_DRIVE_NAME, json!({ "name": name }))
}

#[must_use]
pub fn set_sharing_type(sharing_type: &str) -> Action {
	Action::new(
		SET_SHARING_TYPE,
		json!({ "type": sharing_type }),
		OperationScope::Local,
	)
}

#[must_use]
pub fn set_available_offline(available_offline: bool) -> Action {
	Action::new(
		SET_AVAILABLE_OFFLINE,
		json!({ "availableOffline": available_offline }),
		OperationScope::Local,
	)
}
