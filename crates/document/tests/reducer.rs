use dd_document::{
	hash_state, Action, DocumentModel, Error, ModelError, ModelRegistry, Operation, OperationScope,
	ReducerOptions, Scoped, Signal, UNDO,
};

use serde_json::{json, Value};
use tracing_test::traced_test;

const LIST_TYPE: &str = "test/list";

struct ListModel;

impl DocumentModel for ListModel {
	fn document_type(&self) -> &str {
		LIST_TYPE
	}

	fn initial_state(&self) -> Scoped<Value> {
		Scoped::new(json!({ "items": [] }), json!({ "selected": null }))
	}

	fn reduce(
		&self,
		state: &mut Value,
		operation: &Operation,
		dispatch: &mut dyn FnMut(Signal),
	) -> Result<(), ModelError> {
		match operation.kind.as_str() {
			"ADD_ITEM" => {
				let value = operation.input["value"].clone();
				state["items"]
					.as_array_mut()
					.ok_or_else(|| ModelError::Rejected("items is not a list".to_string()))?
					.push(value);
			}
			"SELECT" => state["selected"] = operation.input["value"].clone(),
			"SPAWN" => dispatch(Signal::CreateChildDocument {
				id: operation.input["id"].as_str().unwrap_or_default().to_string(),
				document_type: LIST_TYPE.to_string(),
				synchronization_units: vec![],
			}),
			other => return Err(ModelError::UnsupportedOperation(other.to_string())),
		}

		Ok(())
	}
}

fn registry() -> ModelRegistry {
	ModelRegistry::default().with_model(ListModel)
}

fn add_item(value: &str) -> Action {
	Action::new("ADD_ITEM", json!({ "value": value }), OperationScope::Global)
}

fn items(state: &Scoped<Value>) -> Vec<String> {
	state.global["items"]
		.as_array()
		.expect("items list")
		.iter()
		.map(|item| item.as_str().expect("string item").to_string())
		.collect()
}

#[test]
#[traced_test]
fn actions_get_sequential_indexes_and_state_hashes() {
	let registry = registry();
	let mut document = registry
		.create_document(LIST_TYPE, "list")
		.expect("registered type");

	for (expected_index, value) in ["a", "b", "c"].into_iter().enumerate() {
		let (next, operation) = registry
			.apply_action(document, &add_item(value), &mut |_| {})
			.expect("action applies");
		document = next;

		assert_eq!(operation.index, expected_index as u64);
		assert_eq!(operation.skip, 0);
		assert_eq!(
			operation.hash,
			hash_state(&document.state.global).expect("hashable state")
		);
		assert_eq!(
			operation.resulting_state.as_ref(),
			Some(&document.state.global)
		);
	}

	assert_eq!(items(&document.state), ["a", "b", "c"]);
	assert_eq!(document.header.revision.global, 3);
	assert_eq!(document.header.revision.local, 0);
}

#[test]
#[traced_test]
fn gap_in_indexes_is_rejected() {
	let registry = registry();
	let document = registry.create_document(LIST_TYPE, "list").expect("registered type");

	let operation = Operation::from_action(&add_item("a"), 2, 0);

	let error = registry
		.reduce(document, &operation, &mut |_| {}, ReducerOptions::default())
		.expect_err("index 2 on an empty history");

	assert!(matches!(
		error,
		Error::MissingOperations {
			expected: 0,
			index: 2,
			skip: 0
		}
	));
	assert_eq!(
		error.to_string(),
		"Missing operations: expected 0 with skip 0 or equivalent, got index 2 with skip 0"
	);
}

#[test]
#[traced_test]
fn skip_rebuilds_state_from_surviving_operations() {
	let registry = registry();
	let mut document = registry.create_document(LIST_TYPE, "list").expect("registered type");

	for value in ["a", "b"] {
		document = registry
			.apply_action(document, &add_item(value), &mut |_| {})
			.expect("action applies")
			.0;
	}

	let replacing = Operation::from_action(&add_item("c"), 2, 1);

	for reuse_operation_resulting_state in [false, true] {
		let result = registry
			.reduce(
				document.clone(),
				&replacing,
				&mut |_| {},
				ReducerOptions {
					skip: None,
					reuse_operation_resulting_state,
				},
			)
			.expect("skip applies");

		assert_eq!(items(&result.state), ["a", "c"]);
		assert_eq!(result.operations.global.len(), 3);
		assert_eq!(result.header.revision.global, 3);
	}
}

#[test]
#[traced_test]
fn signals_are_handed_to_dispatch() {
	let registry = registry();
	let document = registry.create_document(LIST_TYPE, "list").expect("registered type");

	let mut signals = vec![];
	registry
		.apply_action(
			document,
			&Action::new("SPAWN", json!({ "id": "child" }), OperationScope::Global),
			&mut |signal| signals.push(signal),
		)
		.expect("action applies");

	assert_eq!(
		signals,
		[Signal::CreateChildDocument {
			id: "child".to_string(),
			document_type: LIST_TYPE.to_string(),
			synchronization_units: vec![],
		}]
	);
}

#[test]
#[traced_test]
fn set_name_and_noop_keep_state() {
	let registry = registry();
	let document = registry.create_document(LIST_TYPE, "list").expect("registered type");
	let initial_hash = hash_state(&document.state.global).expect("hashable state");

	let (document, renamed) = registry
		.apply_action(
			document,
			&Action::new("SET_NAME", json!("renamed"), OperationScope::Global),
			&mut |_| {},
		)
		.expect("rename applies");

	assert_eq!(document.header.name, "renamed");
	assert_eq!(renamed.hash, initial_hash);

	let (document, noop) = registry
		.apply_action(
			document,
			&Action::new("NOOP", json!({}), OperationScope::Global),
			&mut |_| {},
		)
		.expect("noop applies");

	assert_eq!(noop.index, 1);
	assert_eq!(noop.hash, initial_hash);
	assert!(items(&document.state).is_empty());
}

#[test]
#[traced_test]
fn local_scope_is_independent() {
	let registry = registry();
	let document = registry.create_document(LIST_TYPE, "list").expect("registered type");

	let (document, _) = registry
		.apply_action(document, &add_item("a"), &mut |_| {})
		.expect("global applies");
	let (document, local) = registry
		.apply_action(
			document,
			&Action::new("SELECT", json!({ "value": "a" }), OperationScope::Local),
			&mut |_| {},
		)
		.expect("local applies");

	assert_eq!(local.index, 0);
	assert_eq!(local.scope, OperationScope::Local);
	assert_eq!(document.state.local["selected"], "a");
	assert_eq!(document.header.revision.global, 1);
	assert_eq!(document.header.revision.local, 1);
}

#[test]
#[traced_test]
fn replay_represents_skipped_entries_as_noops() {
	let registry = registry();
	let empty = registry.create_document(LIST_TYPE, "list").expect("registered type");

	let (_, first) = registry
		.apply_action(empty.clone(), &add_item("f1"), &mut |_| {})
		.expect("first applies");

	let mut reindexed = first.clone();
	reindexed.index = 1;
	reindexed.skip = 1;

	let with_first = registry
		.reduce(empty, &first, &mut |_| {}, ReducerOptions::default())
		.expect("first applies");
	let with_first = registry
		.reduce(with_first, &reindexed, &mut |_| {}, ReducerOptions::default())
		.expect("reindexed applies");
	let with_second = registry
		.apply_action(with_first, &add_item("f2"), &mut |_| {})
		.expect("second applies")
		.0;

	assert_eq!(with_second.operations.global.len(), 3);

	let replayed = registry
		.replay_document(
			with_second.header.clone(),
			with_second.initial_state.clone(),
			&with_second.operations,
			true,
		)
		.expect("replays");

	let positions = replayed
		.operations
		.global
		.iter()
		.map(|op| (op.kind.as_str(), op.index, op.skip))
		.collect::<Vec<_>>();

	assert_eq!(
		positions,
		[("NOOP", 0, 0), ("ADD_ITEM", 1, 1), ("ADD_ITEM", 2, 0)]
	);
	assert_eq!(items(&replayed.state), ["f1", "f2"]);

	let replayed_without_cache = registry
		.replay_document(
			with_second.header,
			with_second.initial_state,
			&with_second.operations,
			false,
		)
		.expect("replays");
	assert_eq!(replayed_without_cache.state, replayed.state);
}

#[test]
#[traced_test]
fn rejected_operation_is_recorded_without_changing_state() {
	let registry = registry();
	let document = registry.create_document(LIST_TYPE, "list").expect("registered type");
	let (document, _) = registry
		.apply_action(document, &add_item("a"), &mut |_| {})
		.expect("first applies");

	let mut signals = vec![];
	let (document, rejected) = registry
		.apply_action(
			document,
			&Action::new("RENAME_ALL", json!({}), OperationScope::Global),
			&mut |signal| signals.push(signal),
		)
		.expect("rejections are appended");

	assert_eq!(rejected.index, 1);
	assert_eq!(
		rejected.error.as_deref(),
		Some("unsupported operation <type='RENAME_ALL'>")
	);
	assert_eq!(items(&document.state), ["a"]);
	assert_eq!(document.header.revision.global, 2);
	assert!(signals.is_empty());
}

#[test]
fn unknown_document_type() {
	assert!(matches!(
		registry().create_document("unknown", "doc"),
		Err(Error::UnknownDocumentType(document_type)) if document_type == "unknown"
	));
}

#[test]
#[traced_test]
fn undo_grows_the_skip_of_the_previous_undo() {
	let registry = registry();
	let mut document = registry.create_document(LIST_TYPE, "list").expect("registered type");

	for value in ["a", "b"] {
		document = registry
			.apply_action(document, &add_item(value), &mut |_| {})
			.expect("action applies")
			.0;
	}

	let undo = Action::new(UNDO, json!({}), OperationScope::Global);

	let (document, first) = registry
		.apply_action(document, &undo, &mut |_| {})
		.expect("first undo applies");
	assert_eq!((first.kind.as_str(), first.index, first.skip), ("NOOP", 2, 1));
	assert_eq!(items(&document.state), ["a"]);

	let (document, second) = registry
		.apply_action(document, &undo, &mut |_| {})
		.expect("second undo applies");
	assert_eq!((second.kind.as_str(), second.index, second.skip), ("NOOP", 2, 2));
	assert!(items(&document.state).is_empty());
	assert_eq!(document.header.revision.global, 3);

	assert!(matches!(
		registry.apply_action(document, &undo, &mut |_| {}),
		Err(Error::NothingToUndo(OperationScope::Global))
	));
}

#[test]
#[traced_test]
fn replay_reports_gaps_in_stored_history() {
	let registry = registry();
	let document = registry.create_document(LIST_TYPE, "list").expect("registered type");

	let mut operations = Scoped::<Vec<Operation>>::default();
	operations.global = vec![
		Operation::from_action(&add_item("a"), 0, 0),
		Operation::from_action(&add_item("c"), 2, 0),
	];

	let replayed = registry
		.replay_document(document.header, document.initial_state, &operations, false)
		.expect("replays");

	assert_eq!(items(&replayed.state), ["a", "c"]);
	assert!(logs_contain("Stored history has an integrity issue;"));
	assert!(logs_contain("MissingIndex"));
}
