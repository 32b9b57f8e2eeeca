use std::sync::Arc;

use greenpatch_namespace::{Module, ModuleName, Name};
use greenpatch_registry::Fingerprint;
use indexmap::IndexMap;

/// Ordered `(dependency name, adapter module)` pairs for one injection.
///
/// Dependency names are unique; adding one again replaces its adapter in
/// place.
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
	pairs: IndexMap<Name, Module>,
}

impl Substitutions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, dependency: &str, adapter: Module) -> Self {
		self.insert(dependency, adapter);
		self
	}

	pub fn insert(&mut self, dependency: &str, adapter: Module) -> Option<Module> {
		self.pairs.insert(Name::from(dependency), adapter)
	}

	pub fn adapter_for(&self, dependency: &str) -> Option<&Module> {
		self.pairs.get(dependency)
	}

	/// Dependency name under which `module` is substituted, if it is one of
	/// the adapters.
	pub fn dependency_of(&self, module: &Module) -> Option<&Name> {
		self.pairs
			.iter()
			.find_map(|(dependency, adapter)| adapter.ptr_eq(module).then_some(dependency))
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Module)> {
		self.pairs.iter().map(|(dependency, adapter)| (&**dependency, adapter))
	}

	pub fn len(&self) -> usize {
		self.pairs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pairs.is_empty()
	}

	pub fn fingerprint(&self) -> Fingerprint {
		Fingerprint::of(self.iter())
	}

	/// `(dependency, adapter name)` pairs recorded on the patched module.
	pub(crate) fn describe(&self) -> Arc<[(Name, ModuleName)]> {
		self.pairs
			.iter()
			.map(|(dependency, adapter)| (dependency.clone(), adapter.name().clone()))
			.collect()
	}
}
