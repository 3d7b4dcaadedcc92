use bb8_redis::{bb8::RunError, redis::RedisError};
use thiserror::Error;

use super::job::JobId;

#[derive(Debug, Error)]
pub enum Error {
	#[error("No server delegate defined")]
	NoDelegate,
	#[error("queue manager was already initialized")]
	AlreadyInitialized,
	#[error("Queue is deleted <id='{0}'>")]
	QueueDeleted(String),
	#[error("job <id='{0}'> was dropped before completing")]
	JobDropped(JobId),
	#[error("server delegate failed: {0}")]
	Delegate(Box<dyn std::error::Error + Send + Sync>),

	#[error("redis error: {0}")]
	Redis(#[from] RedisError),
	#[error("redis pool error: {0}")]
	RedisPool(#[from] RunError<RedisError>),
	#[error("failed to (de)serialize job: {0}")]
	Serialization(#[from] serde_json::Error),
}
