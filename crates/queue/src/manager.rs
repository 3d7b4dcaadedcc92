use std::{
	collections::HashMap,
	fmt, mem,
	sync::{Arc, OnceLock},
	time::Duration,
};

use async_trait::async_trait;
use futures_concurrency::future::{Join, Race};
use tokio::{
	spawn,
	sync::{broadcast, oneshot, Mutex, Notify, RwLock},
	task::{yield_now, JoinHandle},
	time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use super::{
	error::Error,
	job::{queue_id, EnqueuedJob, Job, JobId},
	queue::{memory::MemoryQueueStore, Queue, QueueStore},
};

const WORKER_STAGGER: Duration = Duration::from_millis(100);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const EVENTS_CAPACITY: usize = 256;

/// The drive server side of the queue: tells whether documents exist and processes jobs.
#[async_trait]
pub trait ServerDelegate: Send + Sync + 'static {
	type Output: Clone + Send + Sync + 'static;
	type Error: std::error::Error + Send + Sync + 'static;

	async fn check_document_exists(
		&self,
		drive_id: &str,
		document_id: &str,
	) -> Result<bool, Self::Error>;

	async fn process_operation_job(&self, job: &EnqueuedJob) -> Result<Self::Output, Self::Error>;
}

pub type JobResult<T, E> = Result<T, Arc<E>>;

#[derive(Debug)]
pub enum QueueEvent<T, E> {
	JobCompleted { job: Arc<EnqueuedJob>, result: T },
	JobFailed { job: Arc<EnqueuedJob>, error: Arc<E> },
}

impl<T: Clone, E> Clone for QueueEvent<T, E> {
	fn clone(&self) -> Self {
		match self {
			Self::JobCompleted { job, result } => Self::JobCompleted {
				job: Arc::clone(job),
				result: result.clone(),
			},
			Self::JobFailed { job, error } => Self::JobFailed {
				job: Arc::clone(job),
				error: Arc::clone(error),
			},
		}
	}
}

impl<T, E> QueueEvent<T, E> {
	#[must_use]
	pub fn job(&self) -> &EnqueuedJob {
		match self {
			Self::JobCompleted { job, .. } | Self::JobFailed { job, .. } => job,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
	/// Number of worker loops draining the queues.
	pub workers: usize,
	/// Wait between two polls of an empty or blocked queue, zero retries right away.
	pub timeout: Duration,
}

impl Default for ManagerConfig {
	fn default() -> Self {
		Self {
			workers: 3,
			timeout: Duration::ZERO,
		}
	}
}

/// Resolves once the job it was returned for is processed by this manager.
#[derive(Debug)]
pub struct JobHandle<T, E> {
	job_id: JobId,
	rx: oneshot::Receiver<JobResult<T, E>>,
}

impl<T, E> JobHandle<T, E> {
	#[must_use]
	pub const fn job_id(&self) -> JobId {
		self.job_id
	}

	pub async fn wait(self) -> Result<JobResult<T, E>, Error> {
		let Self { job_id, rx } = self;
		rx.await.map_err(|_| Error::JobDropped(job_id))
	}
}

type Waiter<D> =
	oneshot::Sender<JobResult<<D as ServerDelegate>::Output, <D as ServerDelegate>::Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
	Stop,
	Resume,
}

/// Routes jobs to their queues and drives a pool of workers against a [`ServerDelegate`].
///
/// Workers share a single round robin ticker: every tick selects the next queue, and a job is only
/// claimed from a queue with pending jobs that is not blocked or locked. Claiming happens under the
/// ticker lock, so two workers never lock the same queue.
pub struct QueueManager<D: ServerDelegate> {
	store: Arc<dyn QueueStore>,
	config: ManagerConfig,
	queues: RwLock<Vec<Arc<dyn Queue>>>,
	delegate: OnceLock<Arc<D>>,
	ticker: Mutex<usize>,
	pending: Mutex<HashMap<JobId, Waiter<D>>>,
	events: broadcast::Sender<QueueEvent<D::Output, D::Error>>,
	job_ready: Notify,
	stop: CancellationToken,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: ServerDelegate> fmt::Debug for QueueManager<D> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("QueueManager")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl<D: ServerDelegate> QueueManager<D> {
	/// A manager keeping its queues in memory.
	#[must_use]
	pub fn new(config: ManagerConfig) -> Arc<Self> {
		Self::with_store(Arc::new(MemoryQueueStore), config)
	}

	#[must_use]
	pub fn with_store(store: Arc<dyn QueueStore>, config: ManagerConfig) -> Arc<Self> {
		let (events, _) = broadcast::channel(EVENTS_CAPACITY);

		Arc::new(Self {
			store,
			config,
			queues: RwLock::default(),
			delegate: OnceLock::new(),
			ticker: Mutex::new(0),
			pending: Mutex::default(),
			events,
			job_ready: Notify::new(),
			stop: CancellationToken::new(),
			workers: Mutex::default(),
		})
	}

	/// Registers the delegate, rehydrates persisted queues and spawns the workers.
	pub async fn init(self: &Arc<Self>, delegate: Arc<D>) -> Result<(), Error> {
		self.delegate
			.set(delegate)
			.map_err(|_| Error::AlreadyInitialized)?;

		for id in self.store.persisted_queue_ids().await? {
			self.queue_by_id(id).await?;
		}

		let mut workers = self.workers.lock().await;
		workers.extend((0..self.config.workers).map(|worker_id| {
			let manager = Arc::clone(self);

			spawn(async move {
				while let Err(e) = spawn(Arc::clone(&manager).run_worker(worker_id)).await {
					if e.is_panic() {
						error!(%worker_id, ?e, "Queue worker panicked, restarting;");
					} else {
						error!(%worker_id, ?e, "Queue worker failed;");
						break;
					}
				}
			})
		}));

		debug!(workers = self.config.workers, "Queue manager initialized;");

		Ok(())
	}

	/// Enqueues a job, returning its id.
	pub async fn add_job(&self, job: Job) -> Result<JobId, Error> {
		self.push_job(EnqueuedJob::new(job), None).await
	}

	/// Enqueues a job and returns a handle resolving with the delegate outcome.
	pub async fn enqueue(&self, job: Job) -> Result<JobHandle<D::Output, D::Error>, Error> {
		let (tx, rx) = oneshot::channel();
		let job_id = self.push_job(EnqueuedJob::new(job), Some(tx)).await?;

		Ok(JobHandle { job_id, rx })
	}

	#[instrument(
		skip_all,
		fields(job_id = %job.job_id, drive_id = %job.drive_id, document_id = ?job.document_id),
		err
	)]
	async fn push_job(&self, job: EnqueuedJob, waiter: Option<Waiter<D>>) -> Result<JobId, Error> {
		let delegate = self.delegate.get().ok_or(Error::NoDelegate)?;

		let queue = self
			.get_queue(&job.drive_id, job.document_id.as_deref())
			.await?;

		if queue.is_deleted().await? {
			return Err(Error::QueueDeleted(queue.id().to_string()));
		}

		if let Some(document_id) = job.document_id.as_deref() {
			if !queue.is_blocked().await?
				&& !document_exists(delegate.as_ref(), &job.drive_id, document_id).await?
			{
				queue.set_blocked(true).await?;

				let creating_job = self
					.get_queue(&job.drive_id, None)
					.await?
					.get_jobs()
					.await?
					.into_iter()
					.find(|pending| pending.adds_file(document_id));

				if let Some(creating_job) = creating_job {
					trace!(creating_job_id = %creating_job.job_id, "Document queue waits on drive job;");
					queue.add_dependencies(&creating_job).await?;
				} else if document_exists(delegate.as_ref(), &job.drive_id, document_id).await? {
					// created while the queue was being blocked
					queue.set_blocked(false).await?;
				}
			}
		}

		for document_id in job.added_files() {
			self.get_queue(&job.drive_id, Some(document_id))
				.await?
				.add_dependencies(&job)
				.await?;
		}

		for node_id in job.deleted_nodes() {
			self.get_queue(&job.drive_id, Some(node_id))
				.await?
				.set_deleted(true)
				.await?;
		}

		let job_id = job.job_id;
		if let Some(waiter) = waiter {
			self.pending.lock().await.insert(job_id, waiter);
		}

		if let Err(e) = queue.add_job(job).await {
			self.pending.lock().await.remove(&job_id);
			return Err(e);
		}

		self.job_ready.notify_waiters();

		Ok(job_id)
	}

	/// The queue of a drive, or of one of its documents, created on first use.
	pub async fn get_queue(
		&self,
		drive_id: &str,
		document_id: Option<&str>,
	) -> Result<Arc<dyn Queue>, Error> {
		self.queue_by_id(queue_id(drive_id, document_id)).await
	}

	async fn queue_by_id(&self, id: String) -> Result<Arc<dyn Queue>, Error> {
		if let Some(queue) = self.queues.read().await.iter().find(|queue| queue.id() == id) {
			return Ok(Arc::clone(queue));
		}

		let mut queues = self.queues.write().await;
		if let Some(queue) = queues.iter().find(|queue| queue.id() == id) {
			return Ok(Arc::clone(queue));
		}

		let queue = self.store.open_queue(&id).await?;
		queues.push(Arc::clone(&queue));

		Ok(queue)
	}

	pub async fn remove_queue(&self, drive_id: &str, document_id: Option<&str>) -> Result<bool, Error> {
		let id = queue_id(drive_id, document_id);

		let removed = {
			let mut queues = self.queues.write().await;
			let before = queues.len();
			queues.retain(|queue| queue.id() != id);
			before != queues.len()
		};

		if removed {
			self.store.remove_queue(&id).await?;
		}

		Ok(removed)
	}

	pub async fn get_queue_by_index(&self, index: usize) -> Option<Arc<dyn Queue>> {
		self.queues.read().await.get(index).cloned()
	}

	/// Ids of every known queue, in round robin order.
	pub async fn get_queues(&self) -> Vec<String> {
		self.queues
			.read()
			.await
			.iter()
			.map(|queue| queue.id().to_string())
			.collect()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<D::Output, D::Error>> {
		self.events.subscribe()
	}

	/// Stops the workers after their current job, pending jobs stay in their queues.
	pub async fn shutdown(&self) {
		self.stop.cancel();

		let workers = mem::take(&mut *self.workers.lock().await);
		for res in workers.join().await {
			if let Err(e) = res {
				error!(?e, "Queue worker failed to shutdown;");
			}
		}
	}

	async fn run_worker(self: Arc<Self>, worker_id: usize) {
		let Some(delegate) = self.delegate.get().cloned() else {
			warn!(%worker_id, "Queue worker started without a delegate;");
			return;
		};

		let stagger = WORKER_STAGGER * u32::try_from(worker_id).unwrap_or(u32::MAX);
		if self.wait(stagger, false).await == Wake::Stop {
			return;
		}

		let mut misses = 0;
		while !self.stop.is_cancelled() {
			let wake = match self.claim_next_job().await {
				Ok(Some((queue, job))) => {
					misses = 0;
					self.process_job(delegate.as_ref(), queue, job).await;
					Wake::Resume
				}

				Ok(None) if !self.config.timeout.is_zero() => self.wait(self.config.timeout, true).await,

				Ok(None) => {
					misses += 1;
					if misses >= self.queues.read().await.len() {
						misses = 0;
						self.wait(IDLE_POLL_INTERVAL, true).await
					} else {
						yield_now().await;
						Wake::Resume
					}
				}

				Err(e) => {
					error!(%worker_id, ?e, "Failed to claim the next job;");
					self.wait(IDLE_POLL_INTERVAL, false).await
				}
			};

			if wake == Wake::Stop {
				break;
			}
		}

		debug!(%worker_id, "Queue worker stopped;");
	}

	async fn wait(&self, duration: Duration, wake_on_new_jobs: bool) -> Wake {
		let stop = async {
			self.stop.cancelled().await;
			Wake::Stop
		};

		let elapsed = async {
			sleep(duration).await;
			Wake::Resume
		};

		if wake_on_new_jobs {
			let job_ready = async {
				self.job_ready.notified().await;
				Wake::Resume
			};

			(stop, elapsed, job_ready).race().await
		} else {
			(stop, elapsed).race().await
		}
	}

	/// Advances the shared ticker and locks the selected queue if it has a job to process.
	async fn claim_next_job(&self) -> Result<Option<(Arc<dyn Queue>, EnqueuedJob)>, Error> {
		let mut ticker = self.ticker.lock().await;

		let queue = {
			let queues = self.queues.read().await;
			if queues.is_empty() {
				return Ok(None);
			}

			let queue = Arc::clone(&queues[*ticker % queues.len()]);
			*ticker = ticker.wrapping_add(1);
			queue
		};

		if queue.is_locked().await?
			|| queue.is_blocked().await?
			|| queue.amount_of_jobs().await? == 0
		{
			return Ok(None);
		}

		queue.set_locked(true).await?;

		match queue.get_next_job().await {
			Ok(Some(job)) => Ok(Some((queue, job))),
			Ok(None) => {
				queue.set_locked(false).await?;
				Ok(None)
			}
			Err(e) => {
				if let Err(e) = queue.set_locked(false).await {
					error!(?e, queue_id = queue.id(), "Failed to unlock queue;");
				}
				Err(e)
			}
		}
	}

	#[instrument(skip_all, fields(job_id = %job.job_id, queue_id = queue.id()))]
	async fn process_job(&self, delegate: &D, queue: Arc<dyn Queue>, job: EnqueuedJob) {
		let job = Arc::new(job);

		let outcome = match delegate.process_operation_job(&job).await {
			Ok(result) => {
				for document_id in job.added_files() {
					let res = match self.get_queue(&job.drive_id, Some(document_id)).await {
						Ok(document_queue) => document_queue.remove_dependencies(&job).await,
						Err(e) => Err(e),
					};

					if let Err(e) = res {
						error!(?e, %document_id, "Failed to release document queue dependency;");
					}
				}

				trace!("Job completed;");
				Ok(result)
			}

			Err(e) => {
				warn!(?e, "Job failed;");
				Err(Arc::new(e))
			}
		};

		self.resolve(job, outcome).await;

		if let Err(e) = queue.set_locked(false).await {
			error!(?e, "Failed to unlock queue after processing job;");
		}

		self.job_ready.notify_waiters();
	}

	async fn resolve(&self, job: Arc<EnqueuedJob>, outcome: JobResult<D::Output, D::Error>) {
		if let Some(waiter) = self.pending.lock().await.remove(&job.job_id) {
			if waiter.send(outcome.clone()).is_err() {
				trace!(job_id = %job.job_id, "Job waiter was dropped;");
			}
		}

		let event = match outcome {
			Ok(result) => QueueEvent::JobCompleted { job, result },
			Err(error) => QueueEvent::JobFailed { job, error },
		};

		// No subscribers is not an error
		self.events.send(event).ok();
	}
}

async fn document_exists<D: ServerDelegate>(
	delegate: &D,
	drive_id: &str,
	document_id: &str,
) -> Result<bool, Error> {
	delegate
		.check_document_exists(drive_id, document_id)
		.await
		.map_err(|e| Error::Delegate(Box::new(e)))
}
