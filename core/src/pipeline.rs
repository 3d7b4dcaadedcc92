//! Reconciles incoming operations with the stored history of a drive or document and persists the
//! outcome.

use dd_document::{
	helpers, Action, Document, MergeStrategy, ModelRegistry, Operation, OperationScope,
	ReducerOptions, Scoped, Signal, SignalResult,
};

use std::{fmt, sync::Arc};

use futures::FutureExt;
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::{debug, error, instrument, trace, warn};

use super::{
	cache::DocumentCache,
	drive::DriveState,
	error::{Error, OperationError, StorageError},
	listener::{ListenerManager, SyncStatus, SyncStatusTracker},
	result::{OperationResult, UpdateStatus},
	server::Backends,
	storage::DriveStorage,
	sync_units::{touched_units, SynchronizationUnit, UnitSource},
};

/// What [`ApplyPipeline::process_operations`] managed to apply before stopping.
///
/// `document` is the resulting view, `operations_applied` the entries to append to the stored
/// history. `error` reports the first failure, later operations of its scope were not tried while
/// the other scope still applied.
#[derive(Debug, Clone)]
pub struct ProcessedOperations {
	pub document: Document,
	pub operations_applied: Vec<Operation>,
	pub signals: Vec<SignalResult>,
	pub error: Option<OperationError>,
}

struct PerformedOperation {
	document: Document,
	operation: Operation,
	signals: Vec<SignalResult>,
}

pub struct ApplyPipeline {
	registry: ModelRegistry,
	merge: Arc<dyn MergeStrategy>,
	storage: Arc<dyn DriveStorage>,
	cache: Arc<dyn DocumentCache>,
	listener: Arc<dyn ListenerManager>,
	sync_status: SyncStatusTracker,
}

impl fmt::Debug for ApplyPipeline {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ApplyPipeline")
			.field("registry", &self.registry)
			.finish_non_exhaustive()
	}
}

impl ApplyPipeline {
	#[must_use]
	pub fn new(registry: ModelRegistry, backends: Backends) -> Self {
		let Backends {
			storage,
			cache,
			listener,
			merge,
		} = backends;

		Self {
			registry,
			merge,
			storage,
			cache,
			listener,
			sync_status: SyncStatusTracker::default(),
		}
	}

	#[must_use]
	pub const fn registry(&self) -> &ModelRegistry {
		&self.registry
	}

	#[must_use]
	pub fn storage(&self) -> &dyn DriveStorage {
		self.storage.as_ref()
	}

	#[must_use]
	pub fn cache(&self) -> &dyn DocumentCache {
		self.cache.as_ref()
	}

	#[must_use]
	pub const fn sync_status(&self) -> &SyncStatusTracker {
		&self.sync_status
	}

	async fn stored_resulting_state(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		operation: &Operation,
	) -> Option<Value> {
		let fetched = match document_id {
			Some(document_id) => {
				self.storage
					.get_operation_resulting_state(
						drive_id,
						document_id,
						operation.scope,
						operation.index,
						&operation.branch,
					)
					.await
			}
			None => {
				self.storage
					.get_drive_operation_resulting_state(
						drive_id,
						operation.scope,
						operation.index,
						&operation.branch,
					)
					.await
			}
		};

		fetched.unwrap_or_else(|e| {
			warn!(?e, index = operation.index, "Failed to fetch operation resulting state;");
			None
		})
	}

	/// Replays the stored, append only, history of a drive or document into its current view.
	pub async fn build_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		stored: &Document,
	) -> Result<Document, Error> {
		let mut cleaned = Scoped::<Vec<Operation>>::default();

		for scope in OperationScope::iter() {
			let mut operations = self
				.merge
				.garbage_collect(&self.merge.sort_operations(&stored.operations[scope]));

			if let Some(last) = operations
				.last_mut()
				.filter(|op| op.resulting_state.is_none() && !op.is_noop())
			{
				let state = self.stored_resulting_state(drive_id, document_id, last).await;
				last.resulting_state = state;
			}

			cleaned[scope] = operations;
		}

		self.registry
			.replay_document(
				stored.header.clone(),
				stored.initial_state.clone(),
				&cleaned,
				true,
			)
			.map_err(Into::into)
	}

	/// Applies `operations` on top of `stored`, scope by scope.
	///
	/// Operations already in the stored history are ignored. When the incoming operations diverge
	/// from the stored ones both histories are merged and the reindexed operations are applied
	/// after the last stored one.
	pub async fn process_operations(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		stored: Document,
		operations: &[Operation],
	) -> Result<ProcessedOperations, Error> {
		let mut document = self.build_document(drive_id, document_id, &stored).await?;
		let mut operations_applied = vec![];
		let mut signals = vec![];
		let mut error = None;

		let grouped = helpers::group_operations_by_scope(operations);

		for scope in OperationScope::iter() {
			let incoming = &grouped[scope];

			let branch = self
				.merge
				.remove_existing_operations(incoming, &stored.operations[scope]);

			if branch.is_empty() {
				continue;
			}

			let trunk = self
				.merge
				.garbage_collect(&self.merge.sort_operations(&stored.operations[scope]));

			let (inverted_trunk, tail) = self.merge.attach_branch(&trunk, &branch);

			let new_history = if tail.is_empty() {
				inverted_trunk
			} else {
				debug!(
					%drive_id,
					?document_id,
					%scope,
					diverging = tail.len(),
					"Merging concurrent operations;"
				);
				self.merge.merge(&trunk, &inverted_trunk)
			};

			let new_operations = new_history
				.into_iter()
				.filter(|op| trunk.last().map_or(true, |last| self.merge.precedes(last, op)));

			for next_operation in new_operations {
				// reindexed operations were hashed at another position of the history
				let skip_hash_validation = !tail.is_empty()
					&& incoming
						.iter()
						.find(|op| op.hash == next_operation.hash)
						.map_or(true, |source| {
							source.index != next_operation.index
								|| source.skip != next_operation.skip
						});

				match self
					.perform_operation(
						drive_id,
						document_id,
						document.clone(),
						&next_operation,
						skip_hash_validation,
					)
					.await
				{
					Ok(performed) => {
						document = performed.document;
						signals.extend(performed.signals);
						operations_applied.push(performed.operation);
					}
					Err(e) => {
						error.get_or_insert(e);
						break;
					}
				}
			}
		}

		document.compact_operations()?;

		Ok(ProcessedOperations {
			document,
			operations_applied,
			signals,
			error,
		})
	}

	async fn perform_operation(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		mut document: Document,
		operation: &Operation,
		skip_hash_validation: bool,
	) -> Result<PerformedOperation, OperationError> {
		let scope = operation.scope;

		let remaining = self
			.merge
			.skip_header_operations(&document.operations[scope], operation.position())
			.map_err(|e| OperationError::from_document(&e, operation))?;

		if let Some(last) = remaining
			.last()
			.filter(|op| op.resulting_state.is_none() && !op.is_noop())
		{
			let state = self.stored_resulting_state(drive_id, document_id, last).await;

			if let Some(entry) = document.operations[scope]
				.iter_mut()
				.rev()
				.find(|op| op.position() == last.position() && !op.is_noop())
			{
				entry.resulting_state = state;
			}
		}

		let mut requested = vec![];
		let document = self
			.registry
			.reduce(
				document,
				operation,
				&mut |signal| requested.push(signal),
				ReducerOptions {
					skip: Some(operation.skip),
					reuse_operation_resulting_state: true,
				},
			)
			.map_err(|e| OperationError::from_document(&e, operation))?;

		let applied = document.operations[scope]
			.iter()
			.rev()
			.find(|op| op.index == operation.index && op.skip == operation.skip)
			.cloned()
			.ok_or_else(|| {
				OperationError::failed(
					UpdateStatus::Error,
					operation,
					format!(
						"Operation with index {}:{} was not applied.",
						operation.index, operation.skip
					),
				)
			})?;

		if applied.error.is_none() && applied.hash != operation.hash && !skip_hash_validation {
			warn!(
				%drive_id,
				?document_id,
				index = operation.index,
				skip = operation.skip,
				expected = %operation.hash,
				got = %applied.hash,
				"Operation hash mismatch;"
			);

			return Err(OperationError::Conflict {
				existing: Box::new(applied),
				incoming: Box::new(operation.clone()),
			});
		}

		let mut signals = Vec::with_capacity(requested.len());
		for signal in requested {
			let result = self
				.handle_signal(drive_id, &signal)
				.await
				.map_err(|e| OperationError::failed(UpdateStatus::Error, operation, e.to_string()))?;

			signals.push(SignalResult { signal, result });
		}

		Ok(PerformedOperation {
			document,
			operation: applied,
			signals,
		})
	}

	/// Signal handlers may run again when a storage transaction is retried, so they tolerate
	/// finding their work already done.
	async fn handle_signal(&self, drive_id: &str, signal: &Signal) -> Result<Option<Document>, Error> {
		match signal {
			Signal::CreateChildDocument {
				id, document_type, ..
			} => {
				if self.storage.check_document_exists(drive_id, id).await? {
					return Ok(Some(self.storage.get_document(drive_id, id).await?));
				}

				let child = self.registry.create_document(document_type, "")?;
				match self.storage.create_document(drive_id, id, child.clone()).await {
					Ok(()) => {
						debug!(%drive_id, document_id = %id, %document_type, "Created child document;");
						Ok(Some(child))
					}
					Err(StorageError::DocumentAlreadyExists { .. }) => {
						Ok(Some(self.storage.get_document(drive_id, id).await?))
					}
					Err(e) => Err(e.into()),
				}
			}

			Signal::DeleteChildDocument { id } => {
				match self.storage.delete_document(drive_id, id).await {
					Ok(()) | Err(StorageError::DocumentNotFound { .. }) => {}
					Err(e) => return Err(e.into()),
				}

				if let Err(e) = self.cache.delete_document(drive_id, Some(id)).await {
					warn!(?e, %drive_id, document_id = %id, "Failed to evict deleted document from cache;");
				}

				debug!(%drive_id, document_id = %id, "Deleted child document;");

				Ok(None)
			}

			Signal::CopyChildDocument { id, new_id, .. } => {
				if self.storage.check_document_exists(drive_id, new_id).await? {
					return Ok(Some(self.storage.get_document(drive_id, new_id).await?));
				}

				let copy = self.storage.get_document(drive_id, id).await?;
				match self.storage.create_document(drive_id, new_id, copy.clone()).await {
					Ok(()) => Ok(Some(copy)),
					Err(StorageError::DocumentAlreadyExists { .. }) => {
						Ok(Some(self.storage.get_document(drive_id, new_id).await?))
					}
					Err(e) => Err(e.into()),
				}
			}
		}
	}

	/// Applies `operations` inside a storage transaction and persists what applied cleanly.
	///
	/// Storage failures are returned as errors. A batch that stopped early is not: the valid
	/// prefix is committed and the failure is reported through [`OperationResult::error`].
	#[instrument(
		skip_all,
		fields(%drive_id, ?document_id, operations = operations.len()),
		err
	)]
	pub async fn add_operations(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		operations: &[Operation],
		force_sync: Option<bool>,
	) -> Result<OperationResult, Error> {
		let processed = match document_id {
			Some(document_id) => {
				self.storage
					.add_document_operations_with_transaction(
						drive_id,
						document_id,
						Box::new(move |stored| {
							self.process_operations(drive_id, Some(document_id), stored, operations)
								.boxed()
						}),
					)
					.await?
			}
			None => {
				self.storage
					.add_drive_operations_with_transaction(
						drive_id,
						Box::new(move |stored| {
							self.process_operations(drive_id, None, stored, operations)
								.boxed()
						}),
					)
					.await?
			}
		};

		if let Err(e) = self
			.cache
			.set_document(drive_id, document_id, &processed.document)
			.await
		{
			warn!(?e, %drive_id, ?document_id, "Failed to update cached document;");
		}

		if !processed.operations_applied.is_empty() {
			let units = self
				.updated_units(drive_id, document_id, &processed.operations_applied)
				.await;
			self.notify_listeners(drive_id, units, force_sync.unwrap_or(true));
		}

		if let Some(e) = &processed.error {
			warn!(?e, %drive_id, ?document_id, "Operations batch stopped early;");
		}

		let ProcessedOperations {
			document,
			operations_applied,
			signals,
			error,
		} = processed;

		Ok(OperationResult {
			status: error
				.as_ref()
				.map_or(UpdateStatus::Success, OperationError::status),
			error,
			document: Some(document),
			operations: operations_applied,
			signals,
		})
	}

	/// The current view of a drive or document, from the cache when possible.
	pub async fn get_document(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
	) -> Result<Document, Error> {
		match self.cache.get_document(drive_id, document_id).await {
			Ok(Some(document)) => return Ok(document),
			Ok(None) => {}
			Err(e) => warn!(?e, %drive_id, ?document_id, "Failed to read cached document;"),
		}

		let stored = match document_id {
			Some(document_id) => self.storage.get_document(drive_id, document_id).await?,
			None => self.storage.get_drive(drive_id).await?,
		};

		let document = self.build_document(drive_id, document_id, &stored).await?;

		if let Err(e) = self.cache.set_document(drive_id, document_id, &document).await {
			warn!(?e, %drive_id, ?document_id, "Failed to update cached document;");
		}

		Ok(document)
	}

	pub async fn drive_state(&self, drive_id: &str) -> Result<DriveState, Error> {
		let drive = self.get_document(drive_id, None).await?;

		serde_json::from_value(drive.state.global)
			.map_err(|e| Error::Document(dd_document::Error::Serialization(e)))
	}

	/// Assigns `actions` the next positions of their scopes on the current view, signals are left
	/// to [`Self::add_operations`].
	pub async fn operations_from_actions(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		actions: &[Action],
	) -> Result<Vec<Operation>, Error> {
		let mut document = self.get_document(drive_id, document_id).await?;
		let mut operations = Vec::with_capacity(actions.len());

		for action in actions {
			let (next, operation) = self.registry.apply_action(document, action, &mut |_| {})?;
			document = next;
			operations.push(operation);
		}

		Ok(operations)
	}

	async fn updated_units(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		applied: &[Operation],
	) -> Vec<SynchronizationUnit> {
		let source = match document_id {
			None => Some(UnitSource::drive()),
			Some(document_id) => match self.drive_state(drive_id).await {
				Ok(drive) => UnitSource::document(&drive, document_id),
				Err(e) => {
					warn!(?e, %drive_id, %document_id, "Failed to resolve synchronization units;");
					None
				}
			},
		};

		source.map_or_else(Vec::new, |source| touched_units(drive_id, &source, applied))
	}

	fn notify_listeners(&self, drive_id: &str, units: Vec<SynchronizationUnit>, force_sync: bool) {
		if units.is_empty() {
			return;
		}

		let listener = Arc::clone(&self.listener);
		let sync_status = self.sync_status.clone();
		let drive_id = drive_id.to_string();

		sync_status.update(&drive_id, SyncStatus::Syncing, None);

		tokio::spawn(async move {
			match listener
				.update_synchronization_revisions(&drive_id, &units, force_sync)
				.await
			{
				Ok(revisions) => {
					trace!(%drive_id, ?revisions, "Listeners updated;");
					sync_status.update(&drive_id, SyncStatus::Success, None);
				}
				Err(e) => {
					error!(?e, %drive_id, "Failed to update listeners;");
					sync_status.update(&drive_id, SyncStatus::Error, Some(e.to_string()));
				}
			}
		});
	}
}
