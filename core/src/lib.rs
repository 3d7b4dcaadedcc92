//!
//! # Drive server core
//!
//! Applies operations to drives and their documents. Work submitted through the `queue_*` entry
//! points is serialized per drive and per document by a [`QueueManager`](dd_queue::QueueManager),
//! then reconciled against the stored history by the [`ApplyPipeline`] before being persisted.
//!
//! The direct `add_*` entry points skip the queue and apply straight away, concurrent callers may
//! then observe conflicts the queue would have prevented.

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

pub mod cache;
pub mod config;
pub mod drive;
mod error;
pub mod listener;
pub mod logging;
mod pipeline;
mod result;
mod server;
pub mod storage;
pub mod sync_units;

pub use config::DriveServerConfig;
pub use error::{Error, OperationError, StorageError};
pub use listener::{DriveEvent, SyncStatus};
pub use pipeline::{ApplyPipeline, ProcessedOperations};
pub use result::{AddOperationOptions, OperationResult, UpdateStatus};
pub use server::{Backends, DriveInput, DriveServer, PipelineDelegate};

pub use dd_document::{Action, Document, Operation, OperationScope};
