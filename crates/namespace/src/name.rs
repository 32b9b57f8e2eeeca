use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// Rejected module name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid module name {name:?}: {reason}")]
pub struct InvalidModuleName {
	pub name: String,
	pub reason: &'static str,
}

/// An absolute, dotted module name (`a.b.c`).
///
/// This is the identity under which modules are resolved, executed and
/// recorded. It is always non-empty and every segment is an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName(Arc<str>);

impl ModuleName {
	/// Parses and validates a dotted module name.
	pub fn parse(s: &str) -> Result<Self, InvalidModuleName> {
		let invalid = |reason| InvalidModuleName {
			name: s.to_string(),
			reason,
		};
		if s.is_empty() {
			return Err(invalid("name is empty"));
		}
		for segment in s.split('.') {
			let mut chars = segment.chars();
			match chars.next() {
				None => return Err(invalid("empty segment")),
				Some(c) if !(c.is_alphabetic() || c == '_') => {
					return Err(invalid("segment must start with a letter or underscore"));
				}
				Some(_) => {}
			}
			if !chars.all(|c| c.is_alphanumeric() || c == '_') {
				return Err(invalid("segment contains a non-identifier character"));
			}
		}
		Ok(Self(Arc::from(s)))
	}

	/// Name of the interpreter-level builtins module.
	pub(crate) fn builtins() -> Self {
		Self(Arc::from("builtins"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for ModuleName {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ModuleName {
	type Err = InvalidModuleName;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<&str> for ModuleName {
	type Error = InvalidModuleName;

	fn try_from(s: &str) -> Result<Self, Self::Error> {
		Self::parse(s)
	}
}

impl AsRef<str> for ModuleName {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl Borrow<str> for ModuleName {
	fn borrow(&self) -> &str {
		&self.0
	}
}
