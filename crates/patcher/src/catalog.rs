//! Locatable module definitions.

use std::fmt;
use std::sync::Arc;

use greenpatch_namespace::{InvalidModuleName, ModuleName};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::{ExecContext, ExecError};

/// Top-level code of a module.
pub type ModuleBody = dyn Fn(&mut ExecContext<'_>) -> Result<(), ExecError> + Send + Sync;

/// A module's name and its top-level code.
///
/// The body is the module's "source": it may be executed more than once,
/// once unpatched and once per patch, each time producing a fresh namespace.
#[derive(Clone)]
pub struct ModuleDef {
	name: ModuleName,
	body: Arc<ModuleBody>,
}

impl ModuleDef {
	pub fn new<F>(name: ModuleName, body: F) -> Self
	where
		F: Fn(&mut ExecContext<'_>) -> Result<(), ExecError> + Send + Sync + 'static,
	{
		Self {
			name,
			body: Arc::new(body),
		}
	}

	pub fn name(&self) -> &ModuleName {
		&self.name
	}

	pub(crate) fn run(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
		(self.body)(ctx)
	}
}

impl fmt::Debug for ModuleDef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleDef").field("name", &self.name).finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
	#[error(transparent)]
	InvalidName(#[from] InvalidModuleName),

	#[error("module '{name}' is defined twice")]
	Duplicate { name: ModuleName },
}

/// Immutable set of module definitions, cheap to clone.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
	defs: Arc<FxHashMap<ModuleName, ModuleDef>>,
}

impl ModuleCatalog {
	pub fn builder() -> CatalogBuilder {
		CatalogBuilder::default()
	}

	pub fn get(&self, name: &ModuleName) -> Option<&ModuleDef> {
		self.defs.get(name)
	}

	pub fn contains(&self, name: &ModuleName) -> bool {
		self.defs.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.defs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.defs.is_empty()
	}

	/// Module names, sorted.
	pub fn names(&self) -> Vec<&ModuleName> {
		let mut names: Vec<_> = self.defs.keys().collect();
		names.sort();
		names
	}
}

impl fmt::Debug for ModuleCatalog {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.names()).finish()
	}
}

/// Accumulates definitions; errors are reported by [`CatalogBuilder::build`].
#[derive(Default)]
pub struct CatalogBuilder {
	defs: IndexMap<ModuleName, ModuleDef>,
	errors: Vec<CatalogError>,
}

impl CatalogBuilder {
	/// Adds a module from its dotted name and top-level code.
	pub fn module<F>(self, name: &str, body: F) -> Self
	where
		F: Fn(&mut ExecContext<'_>) -> Result<(), ExecError> + Send + Sync + 'static,
	{
		match ModuleName::parse(name) {
			Ok(name) => self.def(ModuleDef::new(name, body)),
			Err(err) => self.error(err.into()),
		}
	}

	pub fn def(mut self, def: ModuleDef) -> Self {
		if self.defs.contains_key(def.name()) {
			let name = def.name().clone();
			return self.error(CatalogError::Duplicate { name });
		}
		self.defs.insert(def.name().clone(), def);
		self
	}

	/// Adds every definition of an existing catalog.
	pub fn extend(mut self, catalog: &ModuleCatalog) -> Self {
		for name in catalog.names() {
			if let Some(def) = catalog.get(name) {
				self = self.def(def.clone());
			}
		}
		self
	}

	fn error(mut self, err: CatalogError) -> Self {
		self.errors.push(err);
		self
	}

	pub fn build(mut self) -> Result<ModuleCatalog, CatalogError> {
		if !self.errors.is_empty() {
			return Err(self.errors.swap_remove(0));
		}
		Ok(ModuleCatalog {
			defs: Arc::new(self.defs.into_iter().collect()),
		})
	}
}
