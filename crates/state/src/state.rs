//! The root state tree and its default contents.

use crate::value::{Record, Value, ValueSet};

/// Slice names of the root state tree.
pub mod slices {
	pub const TOOLS: &str = "tools";
	pub const FILTERED_TOOLS: &str = "filteredTools";
	pub const CONFIG: &str = "config";
	pub const IS_LOADING: &str = "isLoading";
	pub const ERROR: &str = "error";
	pub const FILTERS: &str = "filters";
	pub const SORT: &str = "sort";
	pub const VIEW: &str = "view";
	pub const USER: &str = "user";
	pub const UI: &str = "ui";
	/// Values received from peer tabs, keyed by sync key.
	pub const SYNC: &str = "sync";
}

/// Root record of named slices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct State(Record);

impl State {
	/// Returns the value of one slice.
	pub fn slice(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	/// Follows a dotted path starting at a slice name.
	pub fn get_path(&self, path: &str) -> Option<&Value> {
		match path.split_once('.') {
			Some((slice, rest)) => self.0.get(slice)?.get_path(rest),
			None => self.0.get(path),
		}
	}

	/// Slice names in tree order.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub(crate) fn insert(&mut self, key: String, value: Value) {
		self.0.insert(key, value);
	}

	pub(crate) fn slice_mut(&mut self, key: &str) -> &mut Value {
		self.0.entry(key.to_string()).or_default()
	}
}

impl From<State> for Value {
	fn from(state: State) -> Self {
		Value::Record(state.0)
	}
}

/// Default `filters` slice.
pub fn default_filters() -> Value {
	Value::from([
		("category", Value::from("all")),
		("complexity", Value::from("")),
		("type", Value::from("")),
		("featured", Value::from("")),
		("polished", Value::from("")),
		("folder", Value::from("")),
		("tags", Value::Set(ValueSet::new())),
		("searchTerm", Value::from("")),
	])
}

/// Default `sort` slice.
pub fn default_sort() -> Value {
	Value::from([("field", Value::from("name")), ("direction", Value::from("asc"))])
}

/// Default `user` slice.
pub fn default_user() -> Value {
	Value::from([
		("pinnedTools", Value::List(Vec::new())),
		("votes", Value::record()),
		("usage", Value::record()),
		("recentlyOpened", Value::List(Vec::new())),
		("collections", Value::record()),
		("searchHistory", Value::List(Vec::new())),
		("theme", Value::from("dark")),
	])
}

/// Default `ui` slice.
pub fn default_ui() -> Value {
	Value::from([
		("comparisonMode", Value::from(false)),
		("comparisonTools", Value::List(Vec::new())),
		("analyticsEnabled", Value::from(true)),
		("tourCompleted", Value::from(false)),
		("sidebarOpen", Value::from(false)),
	])
}

/// Builds the state every store starts from.
pub fn default_state() -> State {
	use slices::{CONFIG, ERROR, FILTERED_TOOLS, FILTERS, IS_LOADING, SORT, SYNC, TOOLS, UI, USER, VIEW};

	let record: Record = [
		(TOOLS, Value::List(Vec::new())),
		(FILTERED_TOOLS, Value::List(Vec::new())),
		(CONFIG, Value::Null),
		(IS_LOADING, Value::from(true)),
		(ERROR, Value::Null),
		(FILTERS, default_filters()),
		(SORT, default_sort()),
		(VIEW, Value::from([("mode", Value::from("grid")), ("focusedIndex", Value::from(-1))])),
		(USER, default_user()),
		(UI, default_ui()),
		(SYNC, Value::record()),
	]
	.into_iter()
	.map(|(k, v)| (k.to_string(), v))
	.collect();
	State(record)
}
