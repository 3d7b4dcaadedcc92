use super::{
	error::Error,
	helpers,
	operation::{Operation, OperationIndex},
};

/// The history reconciliation primitives the apply pipeline relies on.
///
/// Every method must be pure and deterministic, implementations are free to be swapped for fakes
/// in tests.
pub trait MergeStrategy: Send + Sync + 'static {
	fn sort_operations(&self, operations: &[Operation]) -> Vec<Operation> {
		helpers::sort_operations(operations)
	}

	fn garbage_collect(&self, sorted_operations: &[Operation]) -> Vec<Operation> {
		helpers::garbage_collect(sorted_operations)
	}

	fn remove_existing_operations(
		&self,
		new_operations: &[Operation],
		history: &[Operation],
	) -> Vec<Operation> {
		helpers::remove_existing_operations(new_operations, history)
	}

	fn attach_branch(
		&self,
		trunk: &[Operation],
		new_branch: &[Operation],
	) -> (Vec<Operation>, Vec<Operation>) {
		helpers::attach_branch(trunk, new_branch)
	}

	fn merge(&self, sorted_target: &[Operation], sorted_merge: &[Operation]) -> Vec<Operation> {
		helpers::merge(sorted_target, sorted_merge, helpers::reshuffle_by_timestamp)
	}

	fn precedes(&self, first: &Operation, second: &Operation) -> bool {
		helpers::precedes(first, second)
	}

	fn skip_header_operations(
		&self,
		operations: &[Operation],
		header: OperationIndex,
	) -> Result<Vec<Operation>, Error> {
		helpers::skip_header_operations(operations, header)
	}
}

/// Reconciles concurrent writers by operation timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMergeStrategy;

impl MergeStrategy for DefaultMergeStrategy {}
