#![allow(dead_code)]

use dd_core::{
	drive::{DriveModel, DriveState},
	DriveInput, DriveServer, DriveServerConfig,
};
use dd_document::{
	Action, Document, DocumentModel, ModelError, ModelRegistry, Operation, OperationScope, Scoped,
	Signal,
};

use serde_json::{json, Value};

pub const DRIVE_ID: &str = "drive-1";
pub const BUDGET_TYPE: &str = "test/budget";
pub const ADD_ACCOUNT: &str = "ADD_ACCOUNT";

/// Keeps a list of account addresses.
pub struct BudgetModel;

impl DocumentModel for BudgetModel {
	fn document_type(&self) -> &str {
		BUDGET_TYPE
	}

	fn initial_state(&self) -> Scoped<Value> {
		Scoped::new(json!({ "accounts": [] }), json!({}))
	}

	fn reduce(
		&self,
		state: &mut Value,
		operation: &Operation,
		_dispatch: &mut dyn FnMut(Signal),
	) -> Result<(), ModelError> {
		match operation.kind.as_str() {
			ADD_ACCOUNT => {
				let address = operation.input["address"].clone();
				state["accounts"]
					.as_array_mut()
					.ok_or_else(|| ModelError::Rejected("accounts is not a list".to_string()))?
					.push(address);

				Ok(())
			}
			other => Err(ModelError::UnsupportedOperation(other.to_string())),
		}
	}
}

pub fn registry() -> ModelRegistry {
	ModelRegistry::default()
		.with_model(BudgetModel)
		.with_model(DriveModel)
}

pub async fn server_with(config: DriveServerConfig) -> DriveServer {
	let server = DriveServer::new(config, ModelRegistry::default().with_model(BudgetModel))
		.await
		.expect("server starts");

	server
		.add_drive(DriveInput {
			id: DRIVE_ID.to_string(),
			name: "Drive".to_string(),
			..Default::default()
		})
		.await
		.expect("drive added");

	server
}

pub async fn server() -> DriveServer {
	server_with(DriveServerConfig::default()).await
}

pub fn add_account(address: &str) -> Action {
	Action::new(
		ADD_ACCOUNT,
		json!({ "address": address }),
		OperationScope::Global,
	)
}

pub fn budget_document() -> Document {
	registry()
		.create_document(BUDGET_TYPE, "")
		.expect("budget model registered")
}

/// Operations `actions` produce on a replica of `document`, hashes included.
pub fn build_operations(document: Document, actions: &[Action]) -> (Document, Vec<Operation>) {
	let registry = registry();
	let mut document = document;
	let mut operations = vec![];

	for action in actions {
		let (next, operation) = registry
			.apply_action(document, action, &mut |_| {})
			.expect("action applies on replica");
		document = next;
		operations.push(operation);
	}

	(document, operations)
}

pub fn drive_state(drive: &Document) -> DriveState {
	serde_json::from_value(drive.state.global.clone()).expect("drive state")
}

pub fn node_ids(drive: &Document) -> Vec<String> {
	drive_state(drive)
		.nodes
		.into_iter()
		.map(|node| node.id)
		.collect()
}

pub fn accounts(document: &Document) -> Vec<String> {
	document.state.global["accounts"]
		.as_array()
		.expect("accounts list")
		.iter()
		.map(|account| account.as_str().expect("string address").to_string())
		.collect()
}

pub fn positions(operations: &[Operation]) -> Vec<(&str, u64, u64)> {
	operations
		.iter()
		.map(|op| (op.kind.as_str(), op.index, op.skip))
		.collect()
}
