use std::sync::Arc;

use async_trait::async_trait;

use super::{
	error::Error,
	job::{EnqueuedJob, JobId},
};

pub mod memory;
pub mod redis;

/// A FIFO list of jobs for one drive or one document.
///
/// Workers only pop from a queue that is neither `blocked` nor `locked`. `blocked` is set while the
/// queue waits on dependencies or on its document, `locked` while one of its jobs is processing.
/// Releasing the last dependency clears `blocked` but never `locked`. `deleted` is advisory, the
/// [`QueueManager`](crate::QueueManager) rejects new jobs for deleted queues.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
	fn id(&self) -> &str;

	async fn add_job(&self, job: EnqueuedJob) -> Result<(), Error>;

	/// Pops the oldest job.
	async fn get_next_job(&self) -> Result<Option<EnqueuedJob>, Error>;

	async fn amount_of_jobs(&self) -> Result<usize, Error>;

	/// Pending jobs, oldest first.
	async fn get_jobs(&self) -> Result<Vec<EnqueuedJob>, Error>;

	async fn set_blocked(&self, blocked: bool) -> Result<(), Error>;

	async fn is_blocked(&self) -> Result<bool, Error>;

	async fn set_locked(&self, locked: bool) -> Result<(), Error>;

	async fn is_locked(&self) -> Result<bool, Error>;

	async fn set_deleted(&self, deleted: bool) -> Result<(), Error>;

	async fn is_deleted(&self) -> Result<bool, Error>;

	/// Registers a job this queue waits on, blocking the queue.
	async fn add_dependencies(&self, job: &EnqueuedJob) -> Result<(), Error>;

	/// Drops a job from the dependencies, unblocking the queue once none is left.
	async fn remove_dependencies(&self, job: &EnqueuedJob) -> Result<(), Error>;

	async fn dependencies(&self) -> Result<Vec<JobId>, Error>;
}

/// Creates queues for a backend and keeps track of the ones it persisted.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
	async fn open_queue(&self, id: &str) -> Result<Arc<dyn Queue>, Error>;

	/// Ids of queues that outlived a previous manager, rehydrated on init.
	async fn persisted_queue_ids(&self) -> Result<Vec<String>, Error>;

	async fn remove_queue(&self, id: &str) -> Result<(), Error>;
}
