//! Application key prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed application namespace prepended to every durable key.
///
/// Keys render as `<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
	/// Separator between the namespace and the key name.
	pub const SEPARATOR: char = '/';

	/// Creates a namespace from its prefix.
	pub fn new(prefix: impl Into<String>) -> Self {
		Self(prefix.into())
	}

	/// Returns the bare prefix.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns the full durable key for `name`.
	pub fn key(&self, name: &str) -> String {
		format!("{}{}{}", self.0, Self::SEPARATOR, name)
	}

	/// Returns the key name if `key` lives inside this namespace.
	pub fn strip<'a>(&self, key: &'a str) -> Option<&'a str> {
		key.strip_prefix(self.0.as_str())?
			.strip_prefix(Self::SEPARATOR)
			.filter(|name| !name.is_empty())
	}
}

impl Default for Namespace {
	fn default() -> Self {
		Self::new("lft_v2")
	}
}

impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
