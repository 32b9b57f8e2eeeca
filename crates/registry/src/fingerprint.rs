use std::fmt;
use std::hash::{Hash, Hasher};

use greenpatch_namespace::Module;
use rustc_hash::FxHasher;

/// Identifier of one substitution mapping.
///
/// Computed over `(dependency, adapter name, adapter id)` triples sorted by
/// dependency, so the caller's ordering is irrelevant while a different
/// adapter object under the same name still yields a different value.
/// Stable for the lifetime of the process only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
	/// Fingerprint of an empty mapping.
	pub const EMPTY: Fingerprint = Fingerprint(0);

	pub fn of<'a, I>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (&'a str, &'a Module)>,
	{
		let mut pairs: Vec<_> = pairs.into_iter().collect();
		if pairs.is_empty() {
			return Self::EMPTY;
		}
		pairs.sort_by(|a, b| a.0.cmp(b.0));

		let mut hasher = FxHasher::default();
		pairs.len().hash(&mut hasher);
		for (dependency, adapter) in pairs {
			dependency.hash(&mut hasher);
			adapter.name().hash(&mut hasher);
			adapter.id().hash(&mut hasher);
		}
		// Keep EMPTY reserved for the empty mapping.
		Self(hasher.finish().max(1))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use greenpatch_namespace::{ModuleName, ModuleOrigin, NamespaceBuilder};

	use super::*;

	fn module(name: &str) -> Module {
		NamespaceBuilder::new().freeze(ModuleName::parse(name).unwrap(), ModuleOrigin::Original)
	}

	#[test]
	fn order_does_not_matter() {
		let a = module("green.socket");
		let b = module("green.time");
		let forward = Fingerprint::of([("socket", &a), ("time", &b)]);
		let backward = Fingerprint::of([("time", &b), ("socket", &a)]);
		assert_eq!(forward, backward);
		assert_ne!(forward, Fingerprint::EMPTY);
	}

	#[test]
	fn adapter_identity_matters() {
		let first = module("green.socket");
		let second = module("green.socket");
		assert_ne!(Fingerprint::of([("socket", &first)]), Fingerprint::of([("socket", &second)]));
		assert_ne!(Fingerprint::of([("socket", &first)]), Fingerprint::of([("sock", &first)]));
	}

	#[test]
	fn empty_mapping_is_empty() {
		assert_eq!(Fingerprint::of(std::iter::empty()), Fingerprint::EMPTY);
		assert_eq!(Fingerprint::EMPTY.to_string(), "0000000000000000");
	}
}
