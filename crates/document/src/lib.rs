//!
//! # Document
//!
//! Operation based document model shared by the drive server and its queues.
//!
//! Every mutation of a document is an [`Operation`]: an ordered, hash-chained entry on one of the
//! document's scopes. This crate provides:
//! - The [`Operation`], [`Action`] and [`Document`] types and their serialized forms;
//! - The merge primitives used to reconcile divergent histories ([`helpers`]), also exposed as an
//!   injectable [`MergeStrategy`];
//! - The base reducer ([`ModelRegistry`]) that validates indexes, handles skips, computes state
//!   hashes and delegates the actual state transition to a registered [`DocumentModel`];
//! - The deferred [`Signal`]s a model may emit while reducing an operation.
//!
//! ## Basic example
//!
//! ```
//! use dd_document::{Action, DocumentModel, ModelRegistry, OperationScope, Scoped, Signal};
//! use serde_json::{json, Value};
//!
//! struct Counter;
//!
//! impl DocumentModel for Counter {
//!     fn document_type(&self) -> &str {
//!         "counter"
//!     }
//!
//!     fn initial_state(&self) -> Scoped<Value> {
//!         Scoped::new(json!({ "count": 0 }), json!({}))
//!     }
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Value,
//!         _operation: &dd_document::Operation,
//!         _dispatch: &mut dyn FnMut(Signal),
//!     ) -> Result<(), dd_document::ModelError> {
//!         let count = state["count"].as_i64().unwrap_or_default();
//!         state["count"] = json!(count + 1);
//!         Ok(())
//!     }
//! }
//!
//! let registry = ModelRegistry::default().with_model(Counter);
//! let document = registry.create_document("counter", "my counter").unwrap();
//! let (document, operation) = registry
//!     .apply_action(document, &Action::new("INCREMENT", json!({}), OperationScope::Global), &mut |_| {})
//!     .unwrap();
//!
//! assert_eq!(operation.index, 0);
//! assert_eq!(document.state.global["count"], 1);
//! ```

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

mod document;
mod error;
pub mod helpers;
mod merge;
mod operation;
mod reducer;
mod signal;

pub use document::{hash_state, Document, DocumentHeader};
pub use error::{Error, ModelError};
pub use helpers::{IntegrityIssue, IntegrityIssueSubType, Reshuffle};
pub use merge::{DefaultMergeStrategy, MergeStrategy};
pub use operation::{
	Action, Indexed, Operation, OperationIndex, OperationScope, Scoped, DEFAULT_BRANCH, NOOP,
	SET_NAME, UNDO,
};
pub use reducer::{DocumentModel, ModelRegistry, ReducerOptions};
pub use signal::{Signal, SignalResult, SynchronizationUnitInput};
