use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bb8_redis::{
	bb8::{Pool, PooledConnection},
	redis::AsyncCommands,
	RedisConnectionManager,
};
use tracing::debug;

use crate::{
	error::Error,
	job::{EnqueuedJob, JobId},
};

use super::{Queue, QueueStore};

/// Hash listing every queue id known to the Redis instance.
const QUEUES_KEY: &str = "queues";

const BLOCKED_FIELD: &str = "blocked";
const LOCKED_FIELD: &str = "locked";
const DELETED_FIELD: &str = "deleted";

pub type RedisPool = Pool<RedisConnectionManager>;

/// Queue shared across processes, jobs live in a Redis list and flags in a Redis hash.
pub struct RedisQueue {
	id: String,
	jobs_key: String,
	flags_key: String,
	dependencies_key: String,
	pool: RedisPool,
}

impl fmt::Debug for RedisQueue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RedisQueue").field("id", &self.id).finish()
	}
}

impl RedisQueue {
	pub fn new(id: impl Into<String>, pool: RedisPool) -> Self {
		let id = id.into();

		Self {
			jobs_key: format!("queue:{id}:jobs"),
			flags_key: format!("queue:{id}"),
			dependencies_key: format!("queue:{id}:dependencies"),
			id,
			pool,
		}
	}

	async fn connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>, Error> {
		self.pool.get().await.map_err(Into::into)
	}

	async fn set_flag(&self, field: &str, value: bool) -> Result<(), Error> {
		let mut conn = self.connection().await?;
		if value {
			conn.hset::<_, _, _, ()>(&self.flags_key, field, "true")
				.await?;
		} else {
			conn.hdel::<_, _, ()>(&self.flags_key, field).await?;
		}

		Ok(())
	}

	async fn flag(&self, field: &str) -> Result<bool, Error> {
		let mut conn = self.connection().await?;
		conn.hexists(&self.flags_key, field)
			.await
			.map_err(Into::into)
	}
}

#[async_trait]
impl Queue for RedisQueue {
	fn id(&self) -> &str {
		&self.id
	}

	async fn add_job(&self, job: EnqueuedJob) -> Result<(), Error> {
		let payload = serde_json::to_string(&job)?;
		let mut conn = self.connection().await?;
		conn.lpush::<_, _, ()>(&self.jobs_key, payload).await?;

		Ok(())
	}

	async fn get_next_job(&self) -> Result<Option<EnqueuedJob>, Error> {
		let mut conn = self.connection().await?;
		let payload: Option<String> = conn.rpop(&self.jobs_key, None).await?;

		payload
			.map(|payload| serde_json::from_str(&payload))
			.transpose()
			.map_err(Into::into)
	}

	async fn amount_of_jobs(&self) -> Result<usize, Error> {
		let mut conn = self.connection().await?;
		conn.llen(&self.jobs_key).await.map_err(Into::into)
	}

	async fn get_jobs(&self) -> Result<Vec<EnqueuedJob>, Error> {
		let mut conn = self.connection().await?;
		let payloads: Vec<String> = conn.lrange(&self.jobs_key, 0, -1).await?;

		// newest jobs are pushed on the left
		payloads
			.iter()
			.rev()
			.map(|payload| serde_json::from_str(payload).map_err(Into::into))
			.collect()
	}

	async fn set_blocked(&self, blocked: bool) -> Result<(), Error> {
		self.set_flag(BLOCKED_FIELD, blocked).await
	}

	async fn is_blocked(&self) -> Result<bool, Error> {
		self.flag(BLOCKED_FIELD).await
	}

	async fn set_locked(&self, locked: bool) -> Result<(), Error> {
		self.set_flag(LOCKED_FIELD, locked).await
	}

	async fn is_locked(&self) -> Result<bool, Error> {
		self.flag(LOCKED_FIELD).await
	}

	async fn set_deleted(&self, deleted: bool) -> Result<(), Error> {
		self.set_flag(DELETED_FIELD, deleted).await
	}

	async fn is_deleted(&self) -> Result<bool, Error> {
		self.flag(DELETED_FIELD).await
	}

	async fn add_dependencies(&self, job: &EnqueuedJob) -> Result<(), Error> {
		let payload = serde_json::to_string(job)?;
		{
			let mut conn = self.connection().await?;
			conn.hset::<_, _, _, ()>(&self.dependencies_key, job.job_id.to_string(), payload)
				.await?;
		}

		self.set_blocked(true).await
	}

	async fn remove_dependencies(&self, job: &EnqueuedJob) -> Result<(), Error> {
		let remaining: usize = {
			let mut conn = self.connection().await?;
			conn.hdel::<_, _, ()>(&self.dependencies_key, job.job_id.to_string())
				.await?;
			conn.hlen(&self.dependencies_key).await?
		};

		if remaining == 0 {
			self.set_blocked(false).await?;
		}

		Ok(())
	}

	async fn dependencies(&self) -> Result<Vec<JobId>, Error> {
		let mut conn = self.connection().await?;
		let ids: Vec<String> = conn.hkeys(&self.dependencies_key).await?;

		Ok(ids
			.iter()
			.filter_map(|id| id.parse::<JobId>().ok())
			.collect())
	}
}

/// Creates [`RedisQueue`]s on one Redis instance, registering them in the `queues` hash.
#[derive(Clone)]
pub struct RedisQueueStore {
	pool: RedisPool,
}

impl fmt::Debug for RedisQueueStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RedisQueueStore").finish_non_exhaustive()
	}
}

impl RedisQueueStore {
	pub const fn new(pool: RedisPool) -> Self {
		Self { pool }
	}

	pub async fn connect(url: &str) -> Result<Self, Error> {
		let manager = RedisConnectionManager::new(url)?;
		let pool = Pool::builder().build(manager).await?;

		Ok(Self::new(pool))
	}

	#[must_use]
	pub const fn pool(&self) -> &RedisPool {
		&self.pool
	}
}

#[async_trait]
impl QueueStore for RedisQueueStore {
	async fn open_queue(&self, id: &str) -> Result<Arc<dyn Queue>, Error> {
		{
			let mut conn = self.pool.get().await?;
			conn.hset::<_, _, _, ()>(QUEUES_KEY, id, "true").await?;
		}

		Ok(Arc::new(RedisQueue::new(id, self.pool.clone())))
	}

	async fn persisted_queue_ids(&self) -> Result<Vec<String>, Error> {
		let mut conn = self.pool.get().await?;
		let ids: Vec<String> = conn.hkeys(QUEUES_KEY).await?;
		debug!(count = ids.len(), "Rehydrating queues from redis;");

		Ok(ids)
	}

	async fn remove_queue(&self, id: &str) -> Result<(), Error> {
		let queue = RedisQueue::new(id, self.pool.clone());

		let mut conn = self.pool.get().await?;
		conn.hdel::<_, _, ()>(QUEUES_KEY, id).await?;
		conn.del::<_, ()>(vec![queue.jobs_key, queue.flags_key, queue.dependencies_key])
			.await?;

		Ok(())
	}
}
