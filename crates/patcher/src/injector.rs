//! Injection facade.
//!
//! # Role
//!
//! The single entry point for producing patched modules. Consults the patched
//! registry, and on a miss has the patcher execute the target under the
//! registry's build gate, so the target's top-level code runs at most once.
//!
//! # Invariants
//!
//! - `inject(T, M)` returns the same module object on every call with an
//!   equivalent mapping.
//! - A different mapping for an already patched `T` is always rejected with
//!   [`InjectError::AlreadyPatched`].
//! - Unpatched imports go through a separate registry: patching `T` never
//!   changes what `original(T)` or any other module observes.

use std::sync::Arc;

use greenpatch_namespace::{Module, ModuleName};
use greenpatch_registry::{Fingerprint, ModuleRegistry};
use serde::Deserialize;

use crate::patcher::{self, Mode};
use crate::{InjectError, ModuleCatalog, Substitutions};

/// Conformance switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchOptions {
	/// Compare adapter values against the original facility's values.
	pub verify_shapes: bool,
	/// Require every substituted dependency to be imported at top level.
	pub require_bound_substitutions: bool,
}

impl Default for PatchOptions {
	fn default() -> Self {
		Self {
			verify_shapes: true,
			require_bound_substitutions: true,
		}
	}
}

/// Injection facade; cheap to clone.
#[derive(Clone)]
pub struct Injector {
	inner: Arc<InjectorInner>,
}

struct InjectorInner {
	catalog: ModuleCatalog,
	originals: ModuleRegistry,
	patched: ModuleRegistry,
	options: PatchOptions,
}

impl Injector {
	/// Injector over `catalog` with default options and fresh registries.
	pub fn new(catalog: ModuleCatalog) -> Self {
		Self::builder().catalog(catalog).build()
	}

	pub fn builder() -> InjectorBuilder {
		InjectorBuilder::default()
	}

	/// Returns `target` with the given dependencies rebound to adapters.
	pub fn inject(&self, target: &str, substitutions: Substitutions) -> Result<Module, InjectError> {
		let identity = ModuleName::parse(target)?;
		self.inject_module(&identity, substitutions)
	}

	pub fn inject_module(&self, identity: &ModuleName, substitutions: Substitutions) -> Result<Module, InjectError> {
		for (dependency, _) in substitutions.iter() {
			ModuleName::parse(dependency)?;
		}
		let def = self.locate(identity)?;
		let fingerprint = substitutions.fingerprint();
		let entry = self.inner.patched.get_or_record_with(identity, fingerprint, || {
			patcher::execute(self, def, &substitutions, Mode::Patched)
		})?;
		Ok(entry.module().clone())
	}

	/// The unpatched module, executed at most once per injector.
	pub fn original(&self, name: &ModuleName) -> Result<Module, InjectError> {
		let def = self.locate(name)?;
		let entry = self.inner.originals.get_or_record_with(name, Fingerprint::EMPTY, || {
			patcher::execute(self, def, &Substitutions::new(), Mode::Original)
		})?;
		Ok(entry.module().clone())
	}

	/// [`Self::original`] from a dotted name.
	pub fn original_named(&self, name: &str) -> Result<Module, InjectError> {
		self.original(&ModuleName::parse(name)?)
	}

	pub fn is_patched(&self, name: &str) -> bool {
		ModuleName::parse(name).is_ok_and(|name| self.inner.patched.is_patched(&name))
	}

	pub fn patched_registry(&self) -> &ModuleRegistry {
		&self.inner.patched
	}

	pub fn original_registry(&self) -> &ModuleRegistry {
		&self.inner.originals
	}

	pub fn catalog(&self) -> &ModuleCatalog {
		&self.inner.catalog
	}

	pub fn options(&self) -> &PatchOptions {
		&self.inner.options
	}

	fn locate(&self, name: &ModuleName) -> Result<&crate::ModuleDef, InjectError> {
		self.inner
			.catalog
			.get(name)
			.ok_or_else(|| InjectError::ModuleNotFound { name: name.clone() })
	}
}

impl std::fmt::Debug for Injector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Injector")
			.field("modules", &self.inner.catalog.len())
			.field("originals", &self.inner.originals)
			.field("patched", &self.inner.patched)
			.field("options", &self.inner.options)
			.finish()
	}
}

#[derive(Default)]
pub struct InjectorBuilder {
	catalog: ModuleCatalog,
	options: PatchOptions,
}

impl InjectorBuilder {
	pub fn catalog(mut self, catalog: ModuleCatalog) -> Self {
		self.catalog = catalog;
		self
	}

	pub fn options(mut self, options: PatchOptions) -> Self {
		self.options = options;
		self
	}

	pub fn build(self) -> Injector {
		Injector {
			inner: Arc::new(InjectorInner {
				catalog: self.catalog,
				originals: ModuleRegistry::new("original"),
				patched: ModuleRegistry::new("patched"),
				options: self.options,
			}),
		}
	}
}

#[cfg(test)]
mod tests;
