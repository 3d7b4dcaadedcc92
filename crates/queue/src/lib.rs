//!
//! # Queue
//!
//! Dependency aware job scheduling for the drive server.
//!
//! Jobs carrying operations or actions are routed to one FIFO [`Queue`] per drive, or per
//! `(drive, document)` pair, and drained by a bounded pool of workers that hand every job to a
//! [`ServerDelegate`]. On top of plain FIFO ordering the [`QueueManager`] tracks the edges between
//! queues:
//! - A document queue stays blocked while a pending drive job still carries the `ADD_FILE`
//!   operation creating that document;
//! - A `DELETE_NODE` operation permanently marks the document queue as deleted, rejecting any
//!   further job for it;
//! - A queue is locked while one of its jobs is processing, so jobs of the same queue never run
//!   concurrently.
//!
//! Two interchangeable [`QueueStore`] backends are available: [`MemoryQueueStore`] for a single
//! process and [`RedisQueueStore`] for queues shared by several processes through Redis.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod job;
mod manager;
mod queue;

pub use error::Error;
pub use job::{queue_id, EnqueuedJob, Job, JobId, ADD_FILE, DELETE_NODE};
pub use manager::{JobHandle, JobResult, ManagerConfig, QueueEvent, QueueManager, ServerDelegate};
pub use queue::{
	memory::{MemoryQueue, MemoryQueueStore},
	redis::{RedisQueue, RedisQueueStore},
	Queue, QueueStore,
};
