use std::{collections::HashMap, fmt, sync::Arc};

use chrono::Utc;
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::{trace, warn};

use super::{
	document::{hash_state, Document, DocumentHeader},
	error::{Error, ModelError},
	helpers,
	operation::{Action, Operation, OperationScope, Scoped, NOOP, SET_NAME, UNDO},
	signal::Signal,
};

/// State transitions of one document type.
///
/// Implementations only ever see the state of the scope the operation belongs to. Index
/// bookkeeping, skips and hashing are handled by the [`ModelRegistry`].
pub trait DocumentModel: Send + Sync + 'static {
	fn document_type(&self) -> &str;

	fn initial_state(&self) -> Scoped<Value>;

	fn reduce(
		&self,
		state: &mut Value,
		operation: &Operation,
		dispatch: &mut dyn FnMut(Signal),
	) -> Result<(), ModelError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerOptions {
	/// Overrides the skip carried by the operation.
	pub skip: Option<u64>,
	/// Starts from the cached resulting state of the last surviving operation instead of
	/// replaying the scope from its initial state.
	pub reuse_operation_resulting_state: bool,
}

/// Registered document models, also acting as the base reducer wrapping them.
#[derive(Clone, Default)]
pub struct ModelRegistry {
	models: HashMap<String, Arc<dyn DocumentModel>>,
}

impl fmt::Debug for ModelRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModelRegistry")
			.field("document_types", &self.models.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl ModelRegistry {
	#[must_use]
	pub fn with_model(mut self, model: impl DocumentModel) -> Self {
		self.register(model);
		self
	}

	pub fn register(&mut self, model: impl DocumentModel) {
		self.models
			.insert(model.document_type().to_string(), Arc::new(model));
	}

	#[must_use]
	pub fn supports(&self, document_type: &str) -> bool {
		self.models.contains_key(document_type)
	}

	pub fn model(&self, document_type: &str) -> Result<&Arc<dyn DocumentModel>, Error> {
		self.models
			.get(document_type)
			.ok_or_else(|| Error::UnknownDocumentType(document_type.to_string()))
	}

	pub fn create_document(&self, document_type: &str, name: &str) -> Result<Document, Error> {
		let initial_state = self.model(document_type)?.initial_state();

		Ok(Document {
			header: DocumentHeader::new(document_type, name),
			state: initial_state.clone(),
			initial_state,
			operations: Scoped::default(),
		})
	}

	/// Appends `operation` to its scope history and applies it to the document state.
	///
	/// The appended entry carries the hash and resulting state computed here, callers compare
	/// them against the incoming operation to detect conflicts. An operation rejected by the model
	/// is still appended, with the state untouched and the rejection recorded in its `error`.
	pub fn reduce(
		&self,
		mut document: Document,
		operation: &Operation,
		dispatch: &mut dyn FnMut(Signal),
		options: ReducerOptions,
	) -> Result<Document, Error> {
		let model = self.model(&document.header.document_type)?;

		let scope = operation.scope;
		let skip = options.skip.unwrap_or(operation.skip);
		let next_index = document.next_index(scope);

		if operation.index.saturating_sub(skip) > next_index {
			return Err(Error::MissingOperations {
				expected: next_index,
				index: operation.index,
				skip,
			});
		}

		let mut applied = Operation {
			skip,
			resulting_state: None,
			error: None,
			..operation.clone()
		};

		if skip > 0 {
			let remaining =
				helpers::skip_header_operations(&document.operations[scope], applied.position())?;

			trace!(
				index = applied.index,
				skip,
				remaining = remaining.len(),
				"Rebuilding scope state before skip operation;"
			);

			document.state[scope] = replay_scope(
				model.as_ref(),
				&document.initial_state[scope],
				&remaining,
				options.reuse_operation_resulting_state,
			)?;
		}

		match applied.kind.as_str() {
			NOOP => {}
			SET_NAME => {
				document.header.name = applied
					.input
					.as_str()
					.or_else(|| applied.input.get("name").and_then(Value::as_str))
					.ok_or(Error::InvalidName)?
					.to_string();
			}
			_ => {
				applied.error = reduce_model(
					model.as_ref(),
					&mut document.state[scope],
					&applied,
					dispatch,
				);
			}
		}

		applied.hash = hash_state(&document.state[scope])?;
		applied.resulting_state = Some(document.state[scope].clone());

		document.header.revision[scope] = applied.index + 1;
		document.header.last_modified = applied.timestamp;
		document.operations[scope].push(applied);

		Ok(document)
	}

	/// Turns an action into the next operation of its scope and reduces it.
	///
	/// `UNDO` becomes a `NOOP` skipping the latest entry, or growing the skip of the undo it
	/// follows.
	pub fn apply_action(
		&self,
		document: Document,
		action: &Action,
		dispatch: &mut dyn FnMut(Signal),
	) -> Result<(Document, Operation), Error> {
		let operation = if action.kind == UNDO {
			undo_operation(&document, action.scope)?
		} else {
			Operation::from_action(action, document.next_index(action.scope), 0)
		};
		let document = self.reduce(document, &operation, dispatch, ReducerOptions::default())?;

		let applied = document.operations[action.scope]
			.last()
			.cloned()
			.unwrap_or(operation);

		Ok((document, applied))
	}

	/// Rebuilds a document from its stored, append only, operation history.
	///
	/// The resulting history has one entry per index: entries invalidated by a later skip are
	/// replaced by `NOOP` placeholders.
	pub fn replay_document(
		&self,
		header: DocumentHeader,
		initial_state: Scoped<Value>,
		operations: &Scoped<Vec<Operation>>,
		reuse_operation_resulting_state: bool,
	) -> Result<Document, Error> {
		let model = self.model(&header.document_type)?;

		let mut document = Document {
			header,
			state: initial_state.clone(),
			initial_state,
			operations: Scoped::default(),
		};

		for scope in OperationScope::iter() {
			for issue in helpers::check_operations_integrity(&operations[scope]) {
				warn!(
					%scope,
					index = issue.operation.index,
					skip = issue.operation.skip,
					category = ?issue.category,
					message = %issue.message,
					"Stored history has an integrity issue;"
				);
			}

			let cleaned = helpers::garbage_collect(&helpers::sort_operations(&operations[scope]));

			document.state[scope] = replay_scope(
				model.as_ref(),
				&document.initial_state[scope],
				&cleaned,
				reuse_operation_resulting_state,
			)?;

			let initial_hash = hash_state(&document.initial_state[scope])?;
			document.operations[scope] =
				helpers::expand_skipped_operations(&cleaned, scope, &initial_hash);
			document.header.revision[scope] = cleaned.last().map_or(0, |op| op.index + 1);
		}

		Ok(document)
	}
}

fn undo_operation(document: &Document, scope: OperationScope) -> Result<Operation, Error> {
	let history = helpers::sort_operations(&document.operations[scope]);

	helpers::add_undo(&history)
		.into_iter()
		.nth(history.len())
		.map(|undo| Operation {
			timestamp: Utc::now(),
			resulting_state: None,
			error: None,
			..undo
		})
		.ok_or(Error::NothingToUndo(scope))
}

fn replay_scope(
	model: &dyn DocumentModel,
	initial_state: &Value,
	cleaned_operations: &[Operation],
	reuse_operation_resulting_state: bool,
) -> Result<Value, Error> {
	let mut start = 0;
	let mut state = initial_state.clone();

	if reuse_operation_resulting_state {
		if let Some((position, cached)) = cleaned_operations
			.iter()
			.enumerate()
			.rev()
			.find_map(|(position, op)| op.resulting_state.as_ref().map(|state| (position, state)))
		{
			state = cached.clone();
			start = position + 1;
		}
	}

	for operation in &cleaned_operations[start..] {
		if operation.is_noop() || operation.kind == SET_NAME || operation.error.is_some() {
			continue;
		}

		reduce_model(model, &mut state, operation, &mut |_| {});
	}

	Ok(state)
}

/// Runs the model on `state`, leaving it untouched and returning the message if it rejects the
/// operation. Signals are only forwarded for accepted operations.
fn reduce_model(
	model: &dyn DocumentModel,
	state: &mut Value,
	operation: &Operation,
	dispatch: &mut dyn FnMut(Signal),
) -> Option<String> {
	let mut next_state = state.clone();
	let mut signals = vec![];

	match model.reduce(&mut next_state, operation, &mut |signal| signals.push(signal)) {
		Ok(()) => {
			*state = next_state;
			signals.into_iter().for_each(dispatch);
			None
		}
		Err(e) => {
			warn!(
				?e,
				index = operation.index,
				kind = %operation.kind,
				"Operation rejected by its document model;"
			);
			Some(e.to_string())
		}
	}
}
