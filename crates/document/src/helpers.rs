//! Pure functions over scope histories.
//!
//! A scope history is a list of operations positioned by `(index, skip)`. An operation with
//! `skip = n` invalidates the `n` entries immediately preceding it, so the canonical history is
//! what remains after [`garbage_collect`] drops every invalidated entry.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
	error::Error,
	operation::{Indexed, Operation, OperationIndex, OperationScope, Scoped, NOOP},
};

/// Reorders and reindexes two diverging operation lists starting at the given position.
pub type Reshuffle = fn(OperationIndex, &[Operation], &[Operation]) -> Vec<Operation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityIssueSubType {
	DuplicatedIndex,
	MissingIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
	pub operation: OperationIndex,
	pub category: IntegrityIssueSubType,
	pub message: String,
}

/// Sorts by index, then by skip. Stable, so equal positions keep their relative order.
pub fn sort_operations<T: Indexed + Clone>(operations: &[T]) -> Vec<T> {
	let mut sorted = operations.to_vec();
	sorted.sort_by_key(|op| (op.index(), op.skip()));
	sorted
}

/// Highest index still valid before an entry at `index` skipping `skip` entries, `None` when the
/// entry invalidates the whole history before it.
const fn keep_until(index: u64, skip: u64) -> Option<u64> {
	index.checked_sub(skip + 1)
}

/// Drops every entry invalidated by a later skip, walking the sorted history from its end.
pub fn garbage_collect<T: Indexed + Clone>(sorted_operations: &[T]) -> Vec<T> {
	let mut result = Vec::with_capacity(sorted_operations.len());

	let mut remaining = sorted_operations.len();
	while remaining > 0 {
		let current = &sorted_operations[remaining - 1];
		result.push(current.clone());

		let until = keep_until(current.index(), current.skip());

		let mut next = remaining - 1;
		while next > 0 && until.map_or(true, |until| sorted_operations[next - 1].index() > until) {
			next -= 1;
		}

		remaining = next;
	}

	result.reverse();
	result
}

pub fn precedes(first: &impl Indexed, second: &impl Indexed) -> bool {
	first.index() < second.index()
		|| (first.index() == second.index() && first.skip() < second.skip())
}

/// Compares everything that identifies an operation, ignoring the cached resulting state.
pub fn operations_are_equal(first: &Operation, second: &Operation) -> bool {
	first.scope == second.scope
		&& first.branch == second.branch
		&& first.index == second.index
		&& first.skip == second.skip
		&& first.kind == second.kind
		&& first.hash == second.hash
		&& first.timestamp == second.timestamp
		&& first.input == second.input
}

/// Appends `new_branch` onto `trunk`.
///
/// Returns the resulting history and the trunk entries that could not be kept because the branch
/// diverged from them. A non empty second list means a concurrent edit that needs a [`merge`].
pub fn attach_branch(
	trunk: &[Operation],
	new_branch: &[Operation],
) -> (Vec<Operation>, Vec<Operation>) {
	let mut trunk_copy = VecDeque::from(garbage_collect(&sort_operations(trunk)));
	let mut new_operations = VecDeque::from(garbage_collect(&sort_operations(new_branch)));

	if trunk_copy.is_empty() {
		return (new_operations.into(), vec![]);
	}

	let mut result = Vec::with_capacity(trunk_copy.len() + new_operations.len());
	let mut entered_branch = false;

	while let Some(candidate) = new_operations.front() {
		let mut next_trunk_operation = trunk_copy.pop_front();
		while let Some(trunk_operation) = next_trunk_operation.take() {
			if precedes(&trunk_operation, candidate) {
				result.push(trunk_operation);
				next_trunk_operation = trunk_copy.pop_front();
			} else {
				next_trunk_operation = Some(trunk_operation);
				break;
			}
		}

		match next_trunk_operation {
			None => entered_branch = true,
			Some(trunk_operation) if !entered_branch => {
				if operations_are_equal(&trunk_operation, candidate) {
					new_operations.pop_front();
					result.push(trunk_operation);
				} else {
					trunk_copy.push_front(trunk_operation);
					entered_branch = true;
				}
			}
			Some(_) => {}
		}

		if entered_branch {
			result.extend(new_operations.drain(..));
		}
	}

	if !entered_branch {
		result.extend(trunk_copy.drain(..));
	}

	(garbage_collect(&result), trunk_copy.into())
}

/// Splits two sorted histories into their common prefix and both diverging suffixes.
pub fn split(
	sorted_target_operations: &[Operation],
	sorted_merge_operations: &[Operation],
) -> (Vec<Operation>, Vec<Operation>, Vec<Operation>) {
	let mut common = vec![];
	let mut target_diff = vec![];
	let mut merge_diff = vec![];

	let max_len = sorted_target_operations
		.len()
		.max(sorted_merge_operations.len());

	let mut split_happened = false;
	for i in 0..max_len {
		match (
			sorted_target_operations.get(i),
			sorted_merge_operations.get(i),
		) {
			(Some(target), Some(merge)) => {
				if !split_happened && operations_are_equal(target, merge) {
					common.push(target.clone());
				} else {
					split_happened = true;
					target_diff.push(target.clone());
					merge_diff.push(merge.clone());
				}
			}
			(Some(target), None) => target_diff.push(target.clone()),
			(None, Some(merge)) => merge_diff.push(merge.clone()),
			(None, None) => {}
		}
	}

	(common, target_diff, merge_diff)
}

fn max_index(sorted_operations: &[Operation]) -> Option<u64> {
	sorted_operations.last().map(|op| op.index)
}

/// Merges two diverging histories.
///
/// The common prefix is kept as is and both diverging suffixes are reshuffled after the highest
/// index seen on any side, the first reshuffled entry skipping everything after the prefix.
pub fn merge(
	sorted_target_operations: &[Operation],
	sorted_merge_operations: &[Operation],
	reshuffle: Reshuffle,
) -> Vec<Operation> {
	let (common, target_diff, merge_diff) = split(
		&garbage_collect(sorted_target_operations),
		&garbage_collect(sorted_merge_operations),
	);

	let max_common_index = max_index(&common);
	let next_index = [
		max_common_index,
		max_index(&target_diff),
		max_index(&merge_diff),
	]
	.into_iter()
	.flatten()
	.max()
	.map_or(0, |max| max + 1);

	let start = OperationIndex {
		index: next_index,
		skip: next_index - max_common_index.map_or(0, |index| index + 1),
	};

	let mut history = common;
	history.extend(reshuffle(start, &target_diff, &merge_diff));
	history
}

fn reindex_from(start: OperationIndex, operations: Vec<Operation>) -> Vec<Operation> {
	operations
		.into_iter()
		.zip(start.index..)
		.enumerate()
		.map(|(i, (mut op, index))| {
			op.index = index;
			op.skip = if i == 0 { start.skip } else { 0 };
			op
		})
		.collect()
}

/// Concurrent writers are ordered by their operation timestamps.
pub fn reshuffle_by_timestamp(
	start: OperationIndex,
	first: &[Operation],
	second: &[Operation],
) -> Vec<Operation> {
	let mut operations = first.iter().chain(second).cloned().collect::<Vec<_>>();
	operations.sort_by_key(|op| op.timestamp);

	reindex_from(start, operations)
}

pub fn reshuffle_by_timestamp_and_index(
	start: OperationIndex,
	first: &[Operation],
	second: &[Operation],
) -> Vec<Operation> {
	let mut operations = first.iter().chain(second).cloned().collect::<Vec<_>>();
	operations.sort_by_key(|op| op.timestamp);
	operations.sort_by_key(|op| op.index);

	reindex_from(start, operations)
}

/// Filters out the incoming operations already present in `history`.
pub fn remove_existing_operations(
	new_operations: &[Operation],
	history: &[Operation],
) -> Vec<Operation> {
	new_operations
		.iter()
		.filter(|new_operation| {
			!history.iter().any(|stored| {
				(new_operation.is_noop()
					&& new_operation.skip == 0
					&& new_operation.index == stored.index)
					|| (new_operation.index == stored.index
						&& new_operation.skip == stored.skip
						&& new_operation.scope == stored.scope
						&& new_operation.hash == stored.hash
						&& new_operation.kind == stored.kind)
			})
		})
		.cloned()
		.collect()
}

#[derive(Clone, Copy)]
enum HeaderEntry<'a> {
	Stored(&'a Operation),
	Header(OperationIndex),
}

impl Indexed for HeaderEntry<'_> {
	fn index(&self) -> u64 {
		match self {
			Self::Stored(op) => op.index,
			Self::Header(header) => header.index,
		}
	}

	fn skip(&self) -> u64 {
		match self {
			Self::Stored(op) => op.skip,
			Self::Header(header) => header.skip,
		}
	}
}

/// Operations of `operations` that remain valid once an operation positioned at `header` is
/// appended.
pub fn skip_header_operations(
	operations: &[Operation],
	header: OperationIndex,
) -> Result<Vec<Operation>, Error> {
	if let Some(last_index) = operations.iter().map(|op| op.index).max() {
		if header.index < last_index {
			return Err(Error::SkipHeaderIndex { last_index });
		}
	}

	let entries = operations
		.iter()
		.map(HeaderEntry::Stored)
		.chain(std::iter::once(HeaderEntry::Header(header)))
		.collect::<Vec<_>>();

	let mut cleared = garbage_collect(&sort_operations(&entries));
	cleared.pop();

	Ok(cleared
		.into_iter()
		.filter_map(|entry| match entry {
			HeaderEntry::Stored(op) => Some(op.clone()),
			HeaderEntry::Header(_) => None,
		})
		.collect())
}

pub fn check_cleaned_operations_integrity(sorted_operations: &[Operation]) -> Vec<IntegrityIssue> {
	let mut issues = vec![];

	let mut current_index = -1_i128;
	for operation in sorted_operations {
		let next_index = i128::from(operation.index) - i128::from(operation.skip);
		let expected = current_index + 1;

		if next_index != expected {
			issues.push(IntegrityIssue {
				operation: operation.position(),
				category: if next_index > expected {
					IntegrityIssueSubType::MissingIndex
				} else {
					IntegrityIssueSubType::DuplicatedIndex
				},
				message: format!(
					"Expected index {expected} with skip 0 or equivalent, got index {} with skip {}",
					operation.index, operation.skip
				),
			});
		}

		current_index = i128::from(operation.index);
	}

	issues
}

pub fn check_operations_integrity(operations: &[Operation]) -> Vec<IntegrityIssue> {
	check_cleaned_operations_integrity(&garbage_collect(&sort_operations(operations)))
}

/// Skip an undo appended to this history would need, `None` when there is nothing left to undo.
pub fn next_skip_number(sorted_operations: &[Operation]) -> Option<u64> {
	let cleaned = garbage_collect(sorted_operations);
	let last = cleaned.last()?;

	let mut next_skip = last.skip + 1;
	if cleaned.len() > 1 {
		next_skip += cleaned[cleaned.len() - 2].skip;
	}

	if last.index == 0 || last.index < next_skip {
		None
	} else {
		Some(next_skip)
	}
}

/// Records an undo of the latest entry as a `NOOP`, growing the skip of an existing undo.
pub fn add_undo(sorted_operations: &[Operation]) -> Vec<Operation> {
	let mut operations = sorted_operations.to_vec();

	let Some(latest) = sorted_operations.last() else {
		return operations;
	};

	if latest.is_noop() {
		if let Some(skip) = next_skip_number(sorted_operations) {
			let mut undo = latest.clone();
			undo.skip = skip;
			operations.push(undo);
		}
	} else {
		let mut undo = Operation::noop(latest.scope, latest.index + 1, latest.hash.clone(), Utc::now());
		undo.branch.clone_from(&latest.branch);
		undo.skip = 1;
		operations.push(undo);
	}

	operations
}

pub fn group_operations_by_scope(operations: &[Operation]) -> Scoped<Vec<Operation>> {
	let mut grouped = Scoped::<Vec<Operation>>::default();
	for operation in operations {
		grouped[operation.scope].push(operation.clone());
	}

	grouped
}

/// Rebuilds a dense view of a cleaned history, every index invalidated by a skip is represented
/// by a `NOOP` carrying the hash of the state it left untouched.
pub fn expand_skipped_operations(
	cleaned_operations: &[Operation],
	scope: OperationScope,
	initial_hash: &str,
) -> Vec<Operation> {
	let mut result = Vec::with_capacity(cleaned_operations.len());
	let mut expected_index = 0;
	let mut previous_hash = initial_hash.to_string();

	for operation in cleaned_operations {
		for index in expected_index..operation.index {
			let mut placeholder = Operation::noop(scope, index, previous_hash.clone(), operation.timestamp);
			placeholder.branch.clone_from(&operation.branch);
			result.push(placeholder);
		}

		result.push(operation.clone());
		expected_index = operation.index + 1;
		if operation.kind != NOOP {
			previous_hash.clone_from(&operation.hash);
		}
	}

	result
}

#[cfg(test)]
mod tests {
	use chrono::{DateTime, TimeZone};
	use serde_json::json;

	use super::*;

	fn at(seconds: i64) -> DateTime<Utc> {
		Utc.timestamp_opt(1_700_000_000 + seconds, 0)
			.single()
			.expect("valid timestamp")
	}

	fn op(index: u64, skip: u64) -> Operation {
		Operation {
			scope: OperationScope::Global,
			branch: "main".to_string(),
			index,
			skip,
			kind: "TEST".to_string(),
			input: json!({ "index": index }),
			hash: format!("{index}:{skip}"),
			timestamp: at(i64::try_from(index).expect("small index")),
			resulting_state: None,
			error: None,
		}
	}

	fn named(name: &str, index: u64, skip: u64, second: i64) -> Operation {
		Operation {
			kind: name.to_string(),
			hash: format!("{name}{index}:{skip}"),
			timestamp: at(second),
			..op(index, skip)
		}
	}

	fn positions(operations: &[Operation]) -> Vec<(u64, u64)> {
		operations.iter().map(|op| (op.index, op.skip)).collect()
	}

	#[test]
	fn garbage_collect_drops_skipped_entries() {
		assert!(garbage_collect::<Operation>(&[]).is_empty());
		assert_eq!(positions(&garbage_collect(&[op(0, 0)])), [(0, 0)]);
		assert_eq!(
			positions(&garbage_collect(&[op(0, 0), op(1, 0), op(2, 0)])),
			[(0, 0), (1, 0), (2, 0)]
		);
		assert_eq!(
			positions(&garbage_collect(&[op(0, 0), op(1, 1), op(2, 0)])),
			[(1, 1), (2, 0)]
		);
		assert_eq!(
			positions(&garbage_collect(&[op(0, 0), op(1, 1), op(2, 0), op(3, 1)])),
			[(1, 1), (3, 1)]
		);
		assert_eq!(
			positions(&garbage_collect(&[op(0, 0), op(1, 1), op(2, 0), op(3, 3)])),
			[(3, 3)]
		);
		assert_eq!(
			positions(&garbage_collect(&[op(1, 1), op(2, 0), op(3, 0)])),
			[(1, 1), (2, 0), (3, 0)]
		);
	}

	#[test]
	fn sort_orders_by_index_then_skip() {
		let sorted = sort_operations(&[op(0, 0), op(2, 0), op(1, 0), op(3, 3), op(3, 1)]);
		assert_eq!(positions(&sorted), [(0, 0), (1, 0), (2, 0), (3, 1), (3, 3)]);
	}

	#[test]
	fn attach_branch_appends_after_trunk() {
		let trunk = [op(0, 0), op(1, 0), op(2, 0), op(3, 0)];

		let (history, tail) = attach_branch(&trunk, &[named("B", 4, 0, 10), named("B", 5, 0, 11)]);
		assert_eq!(positions(&history), [(0, 0), (1, 0), (2, 0), (3, 0), (4, 0), (5, 0)]);
		assert!(tail.is_empty());

		let (history, tail) = attach_branch(&trunk, &[named("B", 3, 0, 10), named("B", 4, 0, 11)]);
		assert_eq!(positions(&history), [(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]);
		assert_eq!(history[3].kind, "B");
		assert_eq!(positions(&tail), [(3, 0)]);
	}

	#[test]
	fn attach_branch_ignores_shared_prefix() {
		let trunk = [op(0, 0), op(1, 0)];

		let (history, tail) = attach_branch(&trunk, &[op(0, 0), op(1, 0), op(2, 0)]);
		assert_eq!(positions(&history), [(0, 0), (1, 0), (2, 0)]);
		assert!(tail.is_empty());
	}

	#[test]
	fn attach_branch_on_empty_trunk_returns_branch() {
		let (history, tail) = attach_branch(&[], &[op(0, 0), op(1, 0)]);
		assert_eq!(positions(&history), [(0, 0), (1, 0)]);
		assert!(tail.is_empty());
	}

	#[test]
	fn merge_reshuffles_diverging_suffixes() {
		let target = [
			op(0, 0),
			op(1, 0),
			op(2, 0),
			named("A", 3, 0, 30),
			named("A", 4, 0, 40),
			named("A", 5, 0, 50),
		];
		let incoming = [
			op(0, 0),
			op(1, 0),
			op(2, 0),
			named("B", 3, 0, 31),
			named("B", 4, 2, 41),
			named("B", 5, 0, 51),
		];

		let merged = merge(&target, &incoming, reshuffle_by_timestamp);

		assert_eq!(
			positions(&merged),
			[(0, 0), (1, 0), (6, 4), (7, 0), (8, 0), (9, 0), (10, 0), (11, 0)]
		);
		assert_eq!(
			merged[2..].iter().map(|op| op.kind.as_str()).collect::<Vec<_>>(),
			["TEST", "A", "A", "B", "A", "B"]
		);
	}

	#[test]
	fn merge_of_concurrent_first_operations() {
		let merged = merge(
			&[named("F1", 0, 0, 1)],
			&[named("F2", 0, 0, 2)],
			reshuffle_by_timestamp,
		);

		assert_eq!(positions(&merged), [(1, 1), (2, 0)]);
		assert_eq!(merged[0].kind, "F1");
		assert_eq!(merged[1].kind, "F2");
	}

	#[test]
	fn remove_existing_matches_identity_or_noop_position() {
		let history = [op(0, 0), op(1, 0)];
		let noop = Operation::noop(OperationScope::Global, 1, String::new(), at(0));

		let remaining = remove_existing_operations(&[op(0, 0), noop, op(2, 0)], &history);
		assert_eq!(positions(&remaining), [(2, 0)]);

		let mut diverging = op(1, 0);
		diverging.hash = "other".to_string();
		assert_eq!(remove_existing_operations(&[diverging], &history).len(), 1);
	}

	#[test]
	fn skip_header_keeps_valid_prefix() {
		let history = [op(0, 0), op(1, 0), op(2, 0)];

		let remaining =
			skip_header_operations(&history, OperationIndex { index: 3, skip: 1 }).expect("valid header");
		assert_eq!(positions(&remaining), [(0, 0), (1, 0)]);

		let remaining =
			skip_header_operations(&history, OperationIndex { index: 3, skip: 0 }).expect("valid header");
		assert_eq!(positions(&remaining), [(0, 0), (1, 0), (2, 0)]);

		assert!(matches!(
			skip_header_operations(&history, OperationIndex { index: 1, skip: 0 }),
			Err(Error::SkipHeaderIndex { last_index: 2 })
		));
	}

	#[test]
	fn integrity_reports_missing_and_duplicated_indexes() {
		assert!(check_operations_integrity(&[op(0, 0), op(1, 0), op(2, 1)]).is_empty());

		let issues = check_cleaned_operations_integrity(&[op(0, 0), op(2, 0)]);
		assert_eq!(issues.len(), 1);
		assert_eq!(issues[0].category, IntegrityIssueSubType::MissingIndex);
		assert_eq!(
			issues[0].message,
			"Expected index 1 with skip 0 or equivalent, got index 2 with skip 0"
		);

		let issues = check_cleaned_operations_integrity(&[op(0, 0), op(1, 0), op(1, 0)]);
		assert_eq!(issues[0].category, IntegrityIssueSubType::DuplicatedIndex);
	}

	#[test]
	fn next_skip_number_follows_undo_chain() {
		assert_eq!(next_skip_number(&[]), None);
		assert_eq!(next_skip_number(&[op(0, 0)]), None);
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 0)]), Some(1));
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 1)]), None);
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 0), op(2, 0)]), Some(1));
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 0), op(2, 0), op(2, 1)]), Some(2));
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 1), op(2, 0)]), Some(2));
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 1), op(2, 2)]), None);
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 1), op(2, 0), op(3, 0)]), Some(1));
		assert_eq!(next_skip_number(&[op(0, 0), op(1, 1), op(2, 0), op(3, 1)]), Some(3));
	}

	#[test]
	fn add_undo_appends_noop_then_grows_skip() {
		let history = add_undo(&[op(0, 0), op(1, 0)]);
		assert_eq!(positions(&history), [(0, 0), (1, 0), (2, 1)]);
		assert!(history[2].is_noop());

		let history = add_undo(&history);
		assert_eq!(positions(&history[3..]), [(2, 2)]);
	}

	#[test]
	fn expanded_history_fills_skipped_positions() {
		let cleaned = garbage_collect(&[named("F1", 0, 0, 1), named("F1", 1, 1, 1), named("F2", 2, 0, 2)]);
		let expanded = expand_skipped_operations(&cleaned, OperationScope::Global, "initial");

		assert_eq!(positions(&expanded), [(0, 0), (1, 1), (2, 0)]);
		assert!(expanded[0].is_noop());
		assert_eq!(expanded[0].hash, "initial");
		assert_eq!(expanded[1].kind, "F1");
	}
}
