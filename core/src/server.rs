use dd_document::{
	Action, DefaultMergeStrategy, Document, MergeStrategy, ModelRegistry, Operation,
};
use dd_queue::{
	EnqueuedJob, Job, MemoryQueueStore, QueueManager, QueueStore, RedisQueueStore, ServerDelegate,
};

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::{
	cache::{DocumentCache, MemoryCache, NoCache},
	config::{DriveServerConfig, QueueBackend},
	drive::{DriveLocalState, DriveModel, DriveState, DRIVE_DOCUMENT_TYPE},
	error::{Error, StorageError},
	listener::{DriveEvent, ListenerManager, MemoryListenerManager, SyncStatus},
	pipeline::ApplyPipeline,
	result::{AddOperationOptions, OperationResult},
	storage::{DriveStorage, MemoryStorage},
	sync_units::{
		find_unit, operation_updates, resolve_unit, unit_sources, OperationDataFilter,
		OperationUpdate, SynchronizationUnit, SynchronizationUnitFilter,
	},
};

/// The collaborators the drive server persists, caches and notifies through.
#[derive(Clone)]
pub struct Backends {
	pub storage: Arc<dyn DriveStorage>,
	pub cache: Arc<dyn DocumentCache>,
	pub listener: Arc<dyn ListenerManager>,
	pub merge: Arc<dyn MergeStrategy>,
}

impl fmt::Debug for Backends {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Backends").finish_non_exhaustive()
	}
}

impl Backends {
	/// In process backends, the cache is skipped when disabled in `config`.
	#[must_use]
	pub fn memory(config: &DriveServerConfig) -> Self {
		let cache: Arc<dyn DocumentCache> = if config.cache.enabled {
			Arc::new(MemoryCache::default())
		} else {
			Arc::new(NoCache)
		};

		Self {
			storage: Arc::new(MemoryStorage::new(config.storage.transaction_retries)),
			cache,
			listener: Arc::new(MemoryListenerManager::default()),
			merge: Arc::new(DefaultMergeStrategy),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveInput {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub icon: Option<String>,
	#[serde(default)]
	pub slug: Option<String>,
	#[serde(default)]
	pub sharing_type: Option<String>,
	#[serde(default)]
	pub available_offline: bool,
}

/// Hands the jobs drained by the queue workers to the [`ApplyPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineDelegate(Arc<ApplyPipeline>);

#[async_trait]
impl ServerDelegate for PipelineDelegate {
	type Output = OperationResult;
	type Error = Error;

	async fn check_document_exists(&self, drive_id: &str, document_id: &str) -> Result<bool, Error> {
		self.0
			.storage()
			.check_document_exists(drive_id, document_id)
			.await
			.map_err(Into::into)
	}

	async fn process_operation_job(&self, job: &EnqueuedJob) -> Result<OperationResult, Error> {
		let document_id = job.document_id.as_deref();

		let operations = if job.operations.is_empty() {
			self.0
				.operations_from_actions(&job.drive_id, document_id, &job.actions)
				.await?
		} else {
			job.operations.clone()
		};

		self.0
			.add_operations(&job.drive_id, document_id, &operations, job.force_sync)
			.await
	}
}

pub struct DriveServer {
	pipeline: Arc<ApplyPipeline>,
	queue: Arc<QueueManager<PipelineDelegate>>,
	config: DriveServerConfig,
}

impl fmt::Debug for DriveServer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DriveServer")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl DriveServer {
	/// Server on in process backends, `registry` holds the document models besides the drive.
	pub async fn new(config: DriveServerConfig, registry: ModelRegistry) -> Result<Self, Error> {
		let backends = Backends::memory(&config);
		Self::with_backends(config, registry, backends).await
	}

	pub async fn with_backends(
		config: DriveServerConfig,
		registry: ModelRegistry,
		backends: Backends,
	) -> Result<Self, Error> {
		let pipeline = Arc::new(ApplyPipeline::new(
			registry.with_model(DriveModel),
			backends,
		));

		let store: Arc<dyn QueueStore> = match &config.queue.backend {
			QueueBackend::Memory => Arc::new(MemoryQueueStore::default()),
			QueueBackend::Redis { url } => Arc::new(RedisQueueStore::connect(url).await?),
		};

		let queue = QueueManager::with_store(store, config.manager_config());
		queue
			.init(Arc::new(PipelineDelegate(Arc::clone(&pipeline))))
			.await?;

		info!(
			workers = config.queue.workers,
			backend = ?config.queue.backend,
			"Drive server started;"
		);

		Ok(Self {
			pipeline,
			queue,
			config,
		})
	}

	#[must_use]
	pub const fn config(&self) -> &DriveServerConfig {
		&self.config
	}

	#[must_use]
	pub fn queue(&self) -> &QueueManager<PipelineDelegate> {
		&self.queue
	}

	#[instrument(skip(self), err)]
	pub async fn add_drive(&self, input: DriveInput) -> Result<Document, Error> {
		let storage = self.pipeline.storage();

		if storage.check_drive_exists(&input.id).await? {
			return Err(StorageError::DriveAlreadyExists(input.id).into());
		}

		let mut drive = self
			.pipeline
			.registry()
			.create_document(DRIVE_DOCUMENT_TYPE, &input.name)?;

		let global = DriveState {
			id: input.id.clone(),
			name: input.name,
			icon: input.icon,
			slug: input.slug,
			nodes: vec![],
		};
		let local = DriveLocalState {
			sharing_type: input
				.sharing_type
				.unwrap_or_else(|| DriveLocalState::default().sharing_type),
			available_offline: input.available_offline,
		};

		drive.initial_state.global = serde_json::to_value(global).map_err(dd_document::Error::from)?;
		drive.initial_state.local = serde_json::to_value(local).map_err(dd_document::Error::from)?;
		drive.state = drive.initial_state.clone();

		storage.create_drive(&input.id, drive.clone()).await?;
		self.cache_document(&input.id, None, &drive).await;

		Ok(drive)
	}

	pub async fn get_drives(&self) -> Result<Vec<String>, Error> {
		self.pipeline
			.storage()
			.get_drives()
			.await
			.map_err(Into::into)
	}

	pub async fn get_drive(&self, drive_id: &str) -> Result<Document, Error> {
		self.pipeline.get_document(drive_id, None).await
	}

	/// Removes the drive with its documents and queues.
	#[instrument(skip(self), err)]
	pub async fn delete_drive(&self, drive_id: &str) -> Result<(), Error> {
		let storage = self.pipeline.storage();
		let document_ids = storage.get_documents(drive_id).await?;

		storage.delete_drive(drive_id).await?;

		let queues = std::iter::once(None).chain(document_ids.iter().map(|id| Some(id.as_str())));
		for document_id in queues {
			self.evict_document(drive_id, document_id).await;
			self.queue.remove_queue(drive_id, document_id).await?;
		}

		self.pipeline.sync_status().forget(drive_id);

		Ok(())
	}

	pub async fn get_documents(&self, drive_id: &str) -> Result<Vec<String>, Error> {
		self.pipeline
			.storage()
			.get_documents(drive_id)
			.await
			.map_err(Into::into)
	}

	pub async fn get_document(&self, drive_id: &str, document_id: &str) -> Result<Document, Error> {
		self.pipeline.get_document(drive_id, Some(document_id)).await
	}

	/// Creates an empty document outside of the drive tree, use an `ADD_FILE` operation to also
	/// add it as a node.
	#[instrument(skip(self), err)]
	pub async fn create_document(
		&self,
		drive_id: &str,
		document_id: &str,
		document_type: &str,
	) -> Result<Document, Error> {
		let document = self
			.pipeline
			.registry()
			.create_document(document_type, "")?;

		self.pipeline
			.storage()
			.create_document(drive_id, document_id, document.clone())
			.await?;

		Ok(document)
	}

	#[instrument(skip(self), err)]
	pub async fn delete_document(&self, drive_id: &str, document_id: &str) -> Result<(), Error> {
		self.pipeline
			.storage()
			.delete_document(drive_id, document_id)
			.await?;

		self.evict_document(drive_id, Some(document_id)).await;

		Ok(())
	}

	pub async fn add_operations(
		&self,
		drive_id: &str,
		document_id: &str,
		operations: &[Operation],
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.pipeline
			.add_operations(drive_id, Some(document_id), operations, options.force_sync)
			.await
	}

	pub async fn add_operation(
		&self,
		drive_id: &str,
		document_id: &str,
		operation: Operation,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.add_operations(drive_id, document_id, &[operation], options)
			.await
	}

	pub async fn add_drive_operations(
		&self,
		drive_id: &str,
		operations: &[Operation],
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.pipeline
			.add_operations(drive_id, None, operations, options.force_sync)
			.await
	}

	pub async fn add_drive_operation(
		&self,
		drive_id: &str,
		operation: Operation,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.add_drive_operations(drive_id, &[operation], options)
			.await
	}

	pub async fn add_actions(
		&self,
		drive_id: &str,
		document_id: &str,
		actions: &[Action],
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		let operations = self
			.pipeline
			.operations_from_actions(drive_id, Some(document_id), actions)
			.await?;

		self.add_operations(drive_id, document_id, &operations, options)
			.await
	}

	pub async fn add_action(
		&self,
		drive_id: &str,
		document_id: &str,
		action: Action,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.add_actions(drive_id, document_id, &[action], options)
			.await
	}

	pub async fn add_drive_actions(
		&self,
		drive_id: &str,
		actions: &[Action],
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		let operations = self
			.pipeline
			.operations_from_actions(drive_id, None, actions)
			.await?;

		self.add_drive_operations(drive_id, &operations, options)
			.await
	}

	pub async fn add_drive_action(
		&self,
		drive_id: &str,
		action: Action,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.add_drive_actions(drive_id, &[action], options).await
	}

	/// Serialized counterpart of [`Self::add_operations`], waits for the queued job to be processed.
	#[instrument(skip(self, operations), fields(operations = operations.len()), err)]
	pub async fn queue_operations(
		&self,
		drive_id: &str,
		document_id: &str,
		operations: Vec<Operation>,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		if let Some(result) = self
			.result_if_existing_operations(drive_id, Some(document_id), &operations)
			.await
		{
			return Ok(result);
		}

		self.run_job(
			Job::operations(drive_id, Some(document_id.to_string()), operations)
				.with_force_sync(options.force_sync),
		)
		.await
	}

	pub async fn queue_operation(
		&self,
		drive_id: &str,
		document_id: &str,
		operation: Operation,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.queue_operations(drive_id, document_id, vec![operation], options)
			.await
	}

	#[instrument(skip(self, operations), fields(operations = operations.len()), err)]
	pub async fn queue_drive_operations(
		&self,
		drive_id: &str,
		operations: Vec<Operation>,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		if let Some(result) = self
			.result_if_existing_operations(drive_id, None, &operations)
			.await
		{
			return Ok(result);
		}

		self.run_job(Job::operations(drive_id, None, operations).with_force_sync(options.force_sync))
			.await
	}

	pub async fn queue_drive_operation(
		&self,
		drive_id: &str,
		operation: Operation,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.queue_drive_operations(drive_id, vec![operation], options)
			.await
	}

	pub async fn queue_actions(
		&self,
		drive_id: &str,
		document_id: &str,
		actions: Vec<Action>,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.run_job(
			Job::actions(drive_id, Some(document_id.to_string()), actions)
				.with_force_sync(options.force_sync),
		)
		.await
	}

	pub async fn queue_action(
		&self,
		drive_id: &str,
		document_id: &str,
		action: Action,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.queue_actions(drive_id, document_id, vec![action], options)
			.await
	}

	pub async fn queue_drive_actions(
		&self,
		drive_id: &str,
		actions: Vec<Action>,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.run_job(Job::actions(drive_id, None, actions).with_force_sync(options.force_sync))
			.await
	}

	pub async fn queue_drive_action(
		&self,
		drive_id: &str,
		action: Action,
		options: AddOperationOptions,
	) -> Result<OperationResult, Error> {
		self.queue_drive_actions(drive_id, vec![action], options)
			.await
	}

	async fn run_job(&self, job: Job) -> Result<OperationResult, Error> {
		let handle = self.queue.enqueue(job).await?;
		debug!(job_id = %handle.job_id(), "Waiting on queued job;");

		handle.wait().await?.map_err(Error::JobFailed)
	}

	/// Short circuits batches that are already part of the stored history.
	async fn result_if_existing_operations(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
		operations: &[Operation],
	) -> Option<OperationResult> {
		let document = match self.pipeline.get_document(drive_id, document_id).await {
			Ok(document) => document,
			Err(e) => {
				// the document may be created by a job still in the queue
				if !e.is_not_found() {
					warn!(?e, %drive_id, ?document_id, "Failed to check for existing operations;");
				}
				return None;
			}
		};

		let all_stored = operations.iter().all(|operation| {
			document.operations[operation.scope].iter().any(|stored| {
				stored.index == operation.index
					&& stored.skip == operation.skip
					&& stored.kind == operation.kind
					&& stored.hash == operation.hash
			})
		});

		all_stored.then(|| OperationResult::success(document, vec![]))
	}

	pub async fn get_synchronization_units(
		&self,
		drive_id: &str,
		filter: &SynchronizationUnitFilter,
	) -> Result<Vec<SynchronizationUnit>, Error> {
		let drive = self.pipeline.drive_state(drive_id).await?;

		let mut units = vec![];
		for source in unit_sources(&drive, filter) {
			let document_id = (!source.document_id.is_empty()).then_some(source.document_id.as_str());
			let document = self.pipeline.get_document(drive_id, document_id).await?;

			units.extend(
				source
					.units
					.iter()
					.map(|unit| resolve_unit(drive_id, &source, unit, &document)),
			);
		}

		Ok(units.into_iter().unique_by(|unit| unit.sync_id.clone()).collect_vec())
	}

	pub async fn get_synchronization_unit(
		&self,
		drive_id: &str,
		sync_id: &str,
	) -> Result<SynchronizationUnit, Error> {
		let drive = self.pipeline.drive_state(drive_id).await?;
		let (source, unit) = find_unit(&drive, sync_id).ok_or_else(|| Error::SyncUnitNotFound {
			drive_id: drive_id.to_string(),
			sync_id: sync_id.to_string(),
		})?;

		let document_id = (!source.document_id.is_empty()).then_some(source.document_id.as_str());
		let document = self.pipeline.get_document(drive_id, document_id).await?;

		Ok(resolve_unit(drive_id, &source, &unit, &document))
	}

	/// Operations of one synchronization unit, in the form sent to listeners.
	pub async fn get_operation_data(
		&self,
		drive_id: &str,
		sync_id: &str,
		filter: OperationDataFilter,
	) -> Result<Vec<OperationUpdate>, Error> {
		let drive = self.pipeline.drive_state(drive_id).await?;
		let (source, unit) = find_unit(&drive, sync_id).ok_or_else(|| Error::SyncUnitNotFound {
			drive_id: drive_id.to_string(),
			sync_id: sync_id.to_string(),
		})?;

		let document_id = (!source.document_id.is_empty()).then_some(source.document_id.as_str());
		let document = self.pipeline.get_document(drive_id, document_id).await?;

		Ok(operation_updates(&document, &unit, filter))
	}

	#[must_use]
	pub fn get_sync_status(&self, drive_id: &str) -> Option<SyncStatus> {
		self.pipeline.sync_status().status(drive_id)
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
		self.pipeline.sync_status().subscribe()
	}

	/// Stops the queue workers, jobs still queued are left in the queue store.
	pub async fn shutdown(&self) {
		self.queue.shutdown().await;
		info!("Drive server stopped;");
	}

	async fn cache_document(&self, drive_id: &str, document_id: Option<&str>, document: &Document) {
		if let Err(e) = self
			.pipeline
			.cache()
			.set_document(drive_id, document_id, document)
			.await
		{
			warn!(?e, %drive_id, ?document_id, "Failed to update cached document;");
		}
	}

	async fn evict_document(&self, drive_id: &str, document_id: Option<&str>) {
		if let Err(e) = self
			.pipeline
			.cache()
			.delete_document(drive_id, document_id)
			.await
		{
			warn!(?e, %drive_id, ?document_id, "Failed to evict cached document;");
		}
	}
}
