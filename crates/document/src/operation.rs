use std::ops::{Index, IndexMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

pub const DEFAULT_BRANCH: &str = "main";

/// Placeholder operation type, never changes the document state.
pub const NOOP: &str = "NOOP";

/// Document level operation handled by the base reducer for every document type.
pub const SET_NAME: &str = "SET_NAME";

/// Document level action undoing the latest entry of a scope, recorded as a skipping `NOOP`.
pub const UNDO: &str = "UNDO";

#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	Display,
	AsRefStr,
	EnumString,
	EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationScope {
	Global,
	Local,
}

fn default_branch() -> String {
	DEFAULT_BRANCH.to_string()
}

/// An intent to mutate a document, before it is assigned a position in the scope history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub input: Value,
	pub scope: OperationScope,
}

impl Action {
	pub fn new(kind: impl Into<String>, input: Value, scope: OperationScope) -> Self {
		Self {
			kind: kind.into(),
			input,
			scope,
		}
	}

	/// Reads the `id` field of the action input, used by node related actions.
	#[must_use]
	pub fn input_id(&self) -> Option<&str> {
		self.input.get("id").and_then(Value::as_str)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
	pub scope: OperationScope,
	#[serde(default = "default_branch")]
	pub branch: String,
	pub index: u64,
	#[serde(default)]
	pub skip: u64,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub input: Value,
	#[serde(default)]
	pub hash: String,
	pub timestamp: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resulting_state: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl Operation {
	pub fn from_action(action: &Action, index: u64, skip: u64) -> Self {
		Self {
			scope: action.scope,
			branch: default_branch(),
			index,
			skip,
			kind: action.kind.clone(),
			input: action.input.clone(),
			hash: String::new(),
			timestamp: Utc::now(),
			resulting_state: None,
			error: None,
		}
	}

	/// Stands in for a history entry that was invalidated by a later skip.
	#[must_use]
	pub fn noop(scope: OperationScope, index: u64, hash: String, timestamp: DateTime<Utc>) -> Self {
		Self {
			scope,
			branch: default_branch(),
			index,
			skip: 0,
			kind: NOOP.to_string(),
			input: Value::Object(serde_json::Map::new()),
			hash,
			timestamp,
			resulting_state: None,
			error: None,
		}
	}

	#[must_use]
	pub fn is_noop(&self) -> bool {
		self.kind == NOOP
	}

	#[must_use]
	pub fn input_id(&self) -> Option<&str> {
		self.input.get("id").and_then(Value::as_str)
	}

	#[must_use]
	pub const fn position(&self) -> OperationIndex {
		OperationIndex {
			index: self.index,
			skip: self.skip,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationIndex {
	pub index: u64,
	pub skip: u64,
}

/// Anything positioned on a scope history by an `(index, skip)` pair.
pub trait Indexed {
	fn index(&self) -> u64;
	fn skip(&self) -> u64;
}

impl Indexed for Operation {
	fn index(&self) -> u64 {
		self.index
	}

	fn skip(&self) -> u64 {
		self.skip
	}
}

impl Indexed for OperationIndex {
	fn index(&self) -> u64 {
		self.index
	}

	fn skip(&self) -> u64 {
		self.skip
	}
}

impl<T: Indexed> Indexed for &T {
	fn index(&self) -> u64 {
		(*self).index()
	}

	fn skip(&self) -> u64 {
		(*self).skip()
	}
}

/// One value per [`OperationScope`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoped<T> {
	pub global: T,
	pub local: T,
}

impl<T> Scoped<T> {
	pub const fn new(global: T, local: T) -> Self {
		Self { global, local }
	}

	pub fn iter(&self) -> impl Iterator<Item = (OperationScope, &T)> {
		OperationScope::iter().map(move |scope| (scope, &self[scope]))
	}

	pub fn map<U>(self, mut f: impl FnMut(OperationScope, T) -> U) -> Scoped<U> {
		Scoped {
			global: f(OperationScope::Global, self.global),
			local: f(OperationScope::Local, self.local),
		}
	}
}

impl<T> Index<OperationScope> for Scoped<T> {
	type Output = T;

	fn index(&self, scope: OperationScope) -> &Self::Output {
		match scope {
			OperationScope::Global => &self.global,
			OperationScope::Local => &self.local,
		}
	}
}

impl<T> IndexMut<OperationScope> for Scoped<T> {
	fn index_mut(&mut self, scope: OperationScope) -> &mut Self::Output {
		match scope {
			OperationScope::Global => &mut self.global,
			OperationScope::Local => &mut self.local,
		}
	}
}
