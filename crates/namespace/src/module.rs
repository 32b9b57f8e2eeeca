use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;

use crate::{Args, CallError, CallResult, Class, Function, ModuleName, Name, Value};

/// Process-unique identifier of one module object.
///
/// Two executions of the same source produce two ids, so the id tells apart
/// an original from its patched copy and one adapter object from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
	fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

/// How a module object came to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
	/// Top-level code executed with no substitutions.
	Original,
	/// Top-level code re-executed with `(dependency, adapter)` rebindings.
	Patched { substitutions: Arc<[(Name, ModuleName)]> },
}

/// A frozen module namespace.
///
/// Bindings never change after [`NamespaceBuilder::freeze`]; every importer
/// shares the same object.
#[derive(Clone)]
pub struct Module {
	inner: Arc<ModuleInner>,
}

struct ModuleInner {
	id: ModuleId,
	name: ModuleName,
	origin: ModuleOrigin,
	bindings: IndexMap<Name, Value>,
}

impl Module {
	pub fn id(&self) -> ModuleId {
		self.inner.id
	}

	pub fn name(&self) -> &ModuleName {
		&self.inner.name
	}

	pub fn origin(&self) -> &ModuleOrigin {
		&self.inner.origin
	}

	pub fn is_patched(&self) -> bool {
		matches!(self.inner.origin, ModuleOrigin::Patched { .. })
	}

	pub fn ptr_eq(&self, other: &Module) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.inner.bindings.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.inner.bindings.contains_key(name)
	}

	/// Late-bound attribute lookup for use inside function bodies.
	///
	/// A missing name is an error on this module; there is no other module to
	/// consult.
	pub fn attr(&self, name: &str) -> CallResult<Value> {
		self.get(name).cloned().ok_or_else(|| CallError::LateBindingAttribute {
			module: self.inner.name.clone(),
			name: Name::from(name),
		})
	}

	pub fn function(&self, name: &str) -> CallResult<Function> {
		self.attr(name)?.as_function().cloned()
	}

	pub fn class(&self, name: &str) -> CallResult<Class> {
		self.attr(name)?.as_class().cloned()
	}

	/// Looks up `name` and calls it.
	pub async fn call(&self, name: &str, args: impl Into<Args>) -> CallResult {
		let callee = self.attr(name)?;
		callee.call(args).await
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.inner.bindings.keys().map(|k| &**k)
	}

	pub fn bindings(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.inner.bindings.iter().map(|(k, v)| (&**k, v))
	}

	pub fn len(&self) -> usize {
		self.inner.bindings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.bindings.is_empty()
	}
}

impl fmt::Debug for Module {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Module")
			.field("id", &self.inner.id)
			.field("name", &self.inner.name)
			.field("origin", &self.inner.origin)
			.field("names", &self.inner.bindings.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Handle through which function bodies reach their defining module.
///
/// Handed out while the namespace is still being built and resolved only
/// when a body runs, so bodies observe the frozen bindings, including names
/// bound after the function itself was defined.
#[derive(Clone, Default)]
pub struct Globals {
	cell: Arc<OnceLock<Weak<ModuleInner>>>,
	name: Option<ModuleName>,
}

impl Globals {
	/// The frozen module.
	pub fn module(&self) -> CallResult<Module> {
		self.cell
			.get()
			.and_then(Weak::upgrade)
			.map(|inner| Module { inner })
			.ok_or_else(|| CallError::Executing {
				module: self.name.clone().unwrap_or_else(ModuleName::builtins),
			})
	}

	/// `module.attr(name)` on the frozen module.
	pub fn attr(&self, name: &str) -> CallResult<Value> {
		self.module()?.attr(name)
	}

	/// Module-valued global, typically an imported dependency.
	pub fn import(&self, name: &str) -> CallResult<Module> {
		self.attr(name)?.as_module().cloned()
	}
}

impl fmt::Debug for Globals {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Globals")
			.field("module", &self.name)
			.field("frozen", &self.cell.get().is_some())
			.finish()
	}
}

/// Ordered, mutable bindings under construction.
#[derive(Debug, Default)]
pub struct NamespaceBuilder {
	bindings: IndexMap<Name, Value>,
	globals: Globals,
}

impl NamespaceBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder whose [`Globals`] report `name` while it is still executing.
	pub fn named(name: ModuleName) -> Self {
		Self {
			bindings: IndexMap::new(),
			globals: Globals {
				cell: Arc::default(),
				name: Some(name),
			},
		}
	}

	pub fn globals(&self) -> Globals {
		self.globals.clone()
	}

	/// Binds `name`, returning the value it replaced.
	pub fn bind(&mut self, name: impl Into<Name>, value: impl Into<Value>) -> Option<Value> {
		self.bindings.insert(name.into(), value.into())
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.bindings.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.bindings.contains_key(name)
	}

	/// Copies every public binding of `module`; dunder names stay behind.
	pub fn merge(&mut self, module: &Module) {
		for (name, value) in &module.inner.bindings {
			if !name.starts_with("__") {
				self.bindings.insert(name.clone(), value.clone());
			}
		}
	}

	pub fn len(&self) -> usize {
		self.bindings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bindings.is_empty()
	}

	pub fn freeze(self, name: ModuleName, origin: ModuleOrigin) -> Module {
		let inner = Arc::new(ModuleInner {
			id: ModuleId::next(),
			name,
			origin,
			bindings: self.bindings,
		});
		// A builder is frozen once, so the cell is always empty here.
		let _ = self.globals.cell.set(Arc::downgrade(&inner));
		Module { inner }
	}
}
