use std::{collections::VecDeque, fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
	error::Error,
	job::{EnqueuedJob, JobId},
};

use super::{Queue, QueueStore};

#[derive(Debug, Default)]
struct State {
	jobs: VecDeque<EnqueuedJob>,
	blocked: bool,
	locked: bool,
	deleted: bool,
	dependencies: Vec<EnqueuedJob>,
}

/// In process queue, never fails.
pub struct MemoryQueue {
	id: String,
	state: Mutex<State>,
}

impl fmt::Debug for MemoryQueue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryQueue").field("id", &self.id).finish()
	}
}

impl MemoryQueue {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			state: Mutex::default(),
		}
	}
}

#[async_trait]
impl Queue for MemoryQueue {
	fn id(&self) -> &str {
		&self.id
	}

	async fn add_job(&self, job: EnqueuedJob) -> Result<(), Error> {
		self.state.lock().await.jobs.push_back(job);
		Ok(())
	}

	async fn get_next_job(&self) -> Result<Option<EnqueuedJob>, Error> {
		Ok(self.state.lock().await.jobs.pop_front())
	}

	async fn amount_of_jobs(&self) -> Result<usize, Error> {
		Ok(self.state.lock().await.jobs.len())
	}

	async fn get_jobs(&self) -> Result<Vec<EnqueuedJob>, Error> {
		Ok(self.state.lock().await.jobs.iter().cloned().collect())
	}

	async fn set_blocked(&self, blocked: bool) -> Result<(), Error> {
		self.state.lock().await.blocked = blocked;
		Ok(())
	}

	async fn is_blocked(&self) -> Result<bool, Error> {
		Ok(self.state.lock().await.blocked)
	}

	async fn set_locked(&self, locked: bool) -> Result<(), Error> {
		self.state.lock().await.locked = locked;
		Ok(())
	}

	async fn is_locked(&self) -> Result<bool, Error> {
		Ok(self.state.lock().await.locked)
	}

	async fn set_deleted(&self, deleted: bool) -> Result<(), Error> {
		self.state.lock().await.deleted = deleted;
		Ok(())
	}

	async fn is_deleted(&self) -> Result<bool, Error> {
		Ok(self.state.lock().await.deleted)
	}

	async fn add_dependencies(&self, job: &EnqueuedJob) -> Result<(), Error> {
		let mut state = self.state.lock().await;
		if !state
			.dependencies
			.iter()
			.any(|dependency| dependency.job_id == job.job_id)
		{
			state.dependencies.push(job.clone());
		}
		state.blocked = true;

		Ok(())
	}

	async fn remove_dependencies(&self, job: &EnqueuedJob) -> Result<(), Error> {
		let mut state = self.state.lock().await;
		state
			.dependencies
			.retain(|dependency| dependency.job_id != job.job_id);

		if state.dependencies.is_empty() {
			state.blocked = false;
		}

		Ok(())
	}

	async fn dependencies(&self) -> Result<Vec<JobId>, Error> {
		Ok(self
			.state
			.lock()
			.await
			.dependencies
			.iter()
			.map(|dependency| dependency.job_id)
			.collect())
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryQueueStore;

#[async_trait]
impl QueueStore for MemoryQueueStore {
	async fn open_queue(&self, id: &str) -> Result<Arc<dyn Queue>, Error> {
		Ok(Arc::new(MemoryQueue::new(id)))
	}

	async fn persisted_queue_ids(&self) -> Result<Vec<String>, Error> {
		Ok(vec![])
	}

	async fn remove_queue(&self, _id: &str) -> Result<(), Error> {
		Ok(())
	}
}
