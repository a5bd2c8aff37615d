//! Structured values held in state slices.
//!
//! The store never interprets slice contents. It only needs two things from
//! them: a deep, kind-preserving copy ([`Clone`]) and deep equality
//! ([`PartialEq`]). Four container kinds are kept distinct: ordered
//! sequences ([`Value::List`]), unordered sets ([`Value::Set`]), keyed maps
//! ([`Value::Map`]) and string-keyed records ([`Value::Record`]).

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// String-keyed record preserving insertion order.
pub type Record = IndexMap<String, Value>;

/// A structured slice value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Number(f64),
	String(String),
	Date(DateTime<Utc>),
	List(Vec<Value>),
	Set(ValueSet),
	Map(ValueMap),
	Record(Record),
}

impl Value {
	/// Creates an empty record.
	pub fn record() -> Self {
		Value::Record(Record::new())
	}

	/// Returns a short name of this value's kind.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Number(_) => "number",
			Value::String(_) => "string",
			Value::Date(_) => "date",
			Value::List(_) => "list",
			Value::Set(_) => "set",
			Value::Map(_) => "map",
			Value::Record(_) => "record",
		}
	}

	/// JavaScript truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy.
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Null => false,
			Value::Bool(b) => *b,
			Value::Number(n) => *n != 0.0 && !n.is_nan(),
			Value::String(s) => !s.is_empty(),
			_ => true,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Number(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[Value]> {
		match self {
			Value::List(items) => Some(items),
			_ => None,
		}
	}

	pub fn as_record(&self) -> Option<&Record> {
		match self {
			Value::Record(record) => Some(record),
			_ => None,
		}
	}

	pub fn as_record_mut(&mut self) -> Option<&mut Record> {
		match self {
			Value::Record(record) => Some(record),
			_ => None,
		}
	}

	/// Looks up a field of a record value.
	pub fn get(&self, field: &str) -> Option<&Value> {
		self.as_record()?.get(field)
	}

	/// Follows a dotted path through nested records.
	pub fn get_path(&self, path: &str) -> Option<&Value> {
		path.split('.').try_fold(self, |value, segment| value.get(segment))
	}

	/// Writes `value` at the dotted `path`, creating intermediate records and
	/// replacing non-record intermediates. Returns false if the leaf already
	/// held an equal value.
	pub fn set_path(&mut self, path: &str, value: Value) -> bool {
		match path.split_once('.') {
			None => {
				let record = self.ensure_record();
				if record.get(path) == Some(&value) {
					return false;
				}
				record.insert(path.to_string(), value);
				true
			}
			Some((head, rest)) => self
				.ensure_record()
				.entry(head.to_string())
				.or_insert_with(Value::record)
				.set_path(rest, value),
		}
	}

	fn ensure_record(&mut self) -> &mut Record {
		if !matches!(self, Value::Record(_)) {
			*self = Value::record();
		}
		match self {
			Value::Record(record) => record,
			_ => unreachable!("value was just replaced by a record"),
		}
	}
}

/// Deep equality.
///
/// Sets compare by size and membership, sequences pairwise in order, maps
/// and records by key count and per-key equality. A container compared
/// with itself is equal without descending. Scalars use strict equality, so
/// `NaN` is never equal to itself. Values of different kinds are never equal.
impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		if !matches!(self, Value::Number(_)) && std::ptr::eq(self, other) {
			return true;
		}
		match (self, other) {
			(Value::Null, Value::Null) => true,
			(Value::Null, _) | (_, Value::Null) => false,
			(Value::Bool(a), Value::Bool(b)) => a == b,
			(Value::Number(a), Value::Number(b)) => a == b,
			(Value::String(a), Value::String(b)) => a == b,
			(Value::Date(a), Value::Date(b)) => a == b,
			(Value::Set(a), Value::Set(b)) => a == b,
			(Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y),
			(Value::Map(a), Value::Map(b)) => a == b,
			(Value::Record(a), Value::Record(b)) => {
				a.len() == b.len() && a.iter().all(|(key, value)| b.get(key).is_some_and(|other| value == other))
			}
			_ => false,
		}
	}
}

/// Unordered collection of distinct values.
#[derive(Debug, Clone, Default)]
pub struct ValueSet(Vec<Value>);

impl ValueSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts `value` unless an equal value is present. Returns true if inserted.
	pub fn insert(&mut self, value: Value) -> bool {
		if self.contains(&value) {
			return false;
		}
		self.0.push(value);
		true
	}

	/// Removes the value equal to `value`. Returns true if one was present.
	pub fn remove(&mut self, value: &Value) -> bool {
		match self.0.iter().position(|v| v == value) {
			Some(idx) => {
				self.0.swap_remove(idx);
				true
			}
			None => false,
		}
	}

	pub fn contains(&self, value: &Value) -> bool {
		self.0.iter().any(|v| v == value)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Value> {
		self.0.iter()
	}
}

impl PartialEq for ValueSet {
	fn eq(&self, other: &Self) -> bool {
		self.len() == other.len() && self.iter().all(|v| other.contains(v))
	}
}

impl FromIterator<Value> for ValueSet {
	fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
		let mut set = ValueSet::new();
		for value in iter {
			set.insert(value);
		}
		set
	}
}

impl<'a> IntoIterator for &'a ValueSet {
	type Item = &'a Value;
	type IntoIter = std::slice::Iter<'a, Value>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

/// Map with arbitrary value keys, preserving insertion order.
#[derive(Debug, Clone, Default)]
pub struct ValueMap(Vec<(Value, Value)>);

impl ValueMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces the entry for `key`, returning the previous value.
	pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
		match self.0.iter_mut().find(|(k, _)| *k == key) {
			Some((_, slot)) => Some(std::mem::replace(slot, value)),
			None => {
				self.0.push((key, value));
				None
			}
		}
	}

	pub fn get(&self, key: &Value) -> Option<&Value> {
		self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
		self.0.iter().map(|(k, v)| (k, v))
	}
}

impl PartialEq for ValueMap {
	fn eq(&self, other: &Self) -> bool {
		self.len() == other.len() && self.iter().all(|(k, v)| other.get(k).is_some_and(|o| v == o))
	}
}

impl FromIterator<(Value, Value)> for ValueMap {
	fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
		let mut map = ValueMap::new();
		for (key, value) in iter {
			map.insert(key, value);
		}
		map
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Number(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Number(value as f64)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Number(f64::from(value))
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::String(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::String(value)
	}
}

impl From<DateTime<Utc>> for Value {
	fn from(value: DateTime<Utc>) -> Self {
		Value::Date(value)
	}
}

impl From<Vec<Value>> for Value {
	fn from(value: Vec<Value>) -> Self {
		Value::List(value)
	}
}

impl From<ValueSet> for Value {
	fn from(value: ValueSet) -> Self {
		Value::Set(value)
	}
}

impl From<ValueMap> for Value {
	fn from(value: ValueMap) -> Self {
		Value::Map(value)
	}
}

impl From<Record> for Value {
	fn from(value: Record) -> Self {
		Value::Record(value)
	}
}

impl<const N: usize> From<[(&str, Value); N]> for Value {
	fn from(fields: [(&str, Value); N]) -> Self {
		Value::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
	}
}

/// Decoding never yields sets, maps or dates: JSON has no such kinds.
impl From<serde_json::Value> for Value {
	fn from(json: serde_json::Value) -> Self {
		match json {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
			serde_json::Value::String(s) => Value::String(s),
			serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
			serde_json::Value::Object(fields) => Value::Record(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
		}
	}
}

/// Sets encode as arrays, maps as `[[key, value], ...]`, dates as RFC 3339.
impl From<Value> for serde_json::Value {
	fn from(value: Value) -> Self {
		match value {
			Value::Null => serde_json::Value::Null,
			Value::Bool(b) => serde_json::Value::Bool(b),
			Value::Number(n) => number_to_json(n),
			Value::String(s) => serde_json::Value::String(s),
			Value::Date(d) => serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
			Value::List(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
			Value::Set(set) => serde_json::Value::Array(set.0.into_iter().map(Into::into).collect()),
			Value::Map(map) => serde_json::Value::Array(
				map.0
					.into_iter()
					.map(|(k, v)| serde_json::Value::Array(vec![k.into(), v.into()]))
					.collect(),
			),
			Value::Record(fields) => serde_json::Value::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect()),
		}
	}
}

/// Integral numbers within the exactly representable range encode as JSON
/// integers. Non-finite numbers encode as `null`.
fn number_to_json(n: f64) -> serde_json::Value {
	const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
	if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
		return serde_json::Value::from(n as i64);
	}
	serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}
