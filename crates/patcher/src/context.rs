//! Execution context for top-level module code.
//!
//! # Role
//!
//! The context is the explicit symbol table a module's top-level code runs
//! against. It is built with the substitution table first, then handed to the
//! body, so every import the body performs resolves through the table before
//! any original facility is consulted.
//!
//! # Invariants
//!
//! - A substituted dependency always resolves to its adapter. The only way to
//!   reach the original is [`ExecContext::original`], which refuses
//!   substituted names.
//! - Every symbol read from an adapter at top level is recorded so the
//!   conformance pass can inspect it.
//! - Nothing written here is visible outside until the namespace is frozen.

use greenpatch_namespace::{CallError, Class, Globals, Module, ModuleName, Name, NamespaceBuilder, Value};
use indexmap::IndexSet;

use crate::patcher::Mode;
use crate::{ExecError, Incompatibility, InjectError, Injector, Substitutions};

/// `(dependency, symbol)` read from an adapter during top-level execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Reference {
	pub dependency: Name,
	pub symbol: Name,
}

/// Symbol table a module's top-level code executes against.
pub struct ExecContext<'a> {
	injector: &'a Injector,
	module: ModuleName,
	mode: Mode,
	substitutions: &'a Substitutions,
	namespace: NamespaceBuilder,
	imported: IndexSet<Name>,
	references: IndexSet<Reference>,
}

/// What execution leaves behind for the conformance pass and the freeze.
pub(crate) struct Executed {
	pub namespace: NamespaceBuilder,
	pub imported: IndexSet<Name>,
	pub references: IndexSet<Reference>,
}

impl<'a> ExecContext<'a> {
	pub(crate) fn new(
		injector: &'a Injector,
		module: ModuleName,
		mode: Mode,
		substitutions: &'a Substitutions,
	) -> Self {
		Self {
			injector,
			namespace: NamespaceBuilder::named(module.clone()),
			module,
			mode,
			substitutions,
			imported: IndexSet::new(),
			references: IndexSet::new(),
		}
	}

	/// Name of the module being executed.
	pub fn module_name(&self) -> &ModuleName {
		&self.module
	}

	/// `import dependency`: binds the module under its dotted name.
	pub fn import(&mut self, dependency: &str) -> Result<Module, ExecError> {
		let module = self.resolve(dependency)?;
		self.namespace.bind(dependency, module.clone());
		Ok(module)
	}

	/// `from dependency import a, b`: binds and returns each name in order.
	pub fn import_from(&mut self, dependency: &str, symbols: &[&str]) -> Result<Vec<Value>, ExecError> {
		let module = self.resolve(dependency)?;
		let mut values = Vec::with_capacity(symbols.len());
		for symbol in symbols {
			let value = self.read(&module, dependency, symbol)?;
			self.namespace.bind(*symbol, value.clone());
			values.push(value);
		}
		Ok(values)
	}

	/// `dependency.symbol` evaluated at top level.
	pub fn attr(&mut self, module: &Module, symbol: &str) -> Result<Value, ExecError> {
		match self.substitutions.dependency_of(module).cloned() {
			Some(dependency) => self.read(module, &dependency, symbol),
			None => module.get(symbol).cloned().ok_or_else(|| {
				ExecError::Call(CallError::Attribute {
					owner: Name::from(module.name().as_str()),
					name: Name::from(symbol),
				})
			}),
		}
	}

	/// Like [`Self::attr`] for a class-valued symbol.
	pub fn attr_class(&mut self, module: &Module, symbol: &str) -> Result<Class, ExecError> {
		Ok(self.attr(module, symbol)?.as_class()?.clone())
	}

	/// Binds a class that keeps one identity across executions of this module.
	///
	/// The unpatched execution builds it; patched copies adopt the original's
	/// object, so exceptions raised by either copy match the same handlers.
	pub fn shared_class<F>(&mut self, name: &str, build: F) -> Result<Class, ExecError>
	where
		F: FnOnce(&ModuleName) -> Class,
	{
		let class = match self.mode {
			Mode::Original => build(&self.module),
			Mode::Patched => match self.injector.original(&self.module)?.get(name) {
				Some(Value::Class(class)) => class.clone(),
				_ => build(&self.module),
			},
		};
		self.namespace.bind(name, class.clone());
		Ok(class)
	}

	/// Binds a top-level name. Rebinding replaces the earlier value.
	pub fn define(&mut self, name: &str, value: impl Into<Value>) {
		self.namespace.bind(name, value);
	}

	/// Handle for function bodies defined here to reach this module's
	/// frozen bindings when they run.
	pub fn globals(&self) -> Globals {
		self.namespace.globals()
	}

	/// A name bound earlier in this execution.
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.namespace.get(name)
	}

	/// The unpatched form of a module, without binding it.
	///
	/// Adapters use this to re-export the original's exception classes and
	/// pure helpers. Refused for dependencies substituted in this execution.
	pub fn original(&mut self, name: &str) -> Result<Module, ExecError> {
		if self.substitutions.adapter_for(name).is_some() {
			return Err(InjectError::BypassedSubstitution {
				target: self.module.clone(),
				dependency: Name::from(name),
			}
			.into());
		}
		let name = ModuleName::parse(name)?;
		Ok(self.injector.original(&name)?)
	}

	/// Injects `target` and merges its public bindings into this module.
	///
	/// This is how an adapter module is usually written: re-execute the
	/// original facility with its own dependencies substituted and adopt the
	/// result as this module's namespace.
	pub fn inject_into(&mut self, target: &str, substitutions: Substitutions) -> Result<Module, ExecError> {
		let patched = self.injector.inject(target, substitutions)?;
		self.namespace.merge(&patched);
		Ok(patched)
	}

	pub(crate) fn finish(self) -> Executed {
		Executed {
			namespace: self.namespace,
			imported: self.imported,
			references: self.references,
		}
	}

	fn resolve(&mut self, dependency: &str) -> Result<Module, ExecError> {
		let name = ModuleName::parse(dependency)?;
		self.imported.insert(Name::from(dependency));
		match self.substitutions.adapter_for(dependency) {
			Some(adapter) => Ok(adapter.clone()),
			None => Ok(self.injector.original(&name)?),
		}
	}

	fn read(&mut self, module: &Module, dependency: &str, symbol: &str) -> Result<Value, ExecError> {
		let substituted = self
			.substitutions
			.adapter_for(dependency)
			.is_some_and(|adapter| adapter.ptr_eq(module));
		if substituted {
			self.references.insert(Reference {
				dependency: Name::from(dependency),
				symbol: Name::from(symbol),
			});
		}
		match module.get(symbol) {
			Some(value) => Ok(value.clone()),
			None if substituted => Err(InjectError::IncompatibleAdapter {
				target: self.module.clone(),
				adapter: module.name().clone(),
				dependency: Name::from(dependency),
				symbol: Name::from(symbol),
				reason: Incompatibility::Missing,
			}
			.into()),
			None => Err(InjectError::ImportName {
				module: module.name().clone(),
				symbol: Name::from(symbol),
			}
			.into()),
		}
	}
}
