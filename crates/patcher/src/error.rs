use std::fmt;

use greenpatch_namespace::{Arity, CallError, InvalidModuleName, ModuleName, Name};
use greenpatch_registry::{Fingerprint, RegistryError};

/// Why an adapter value cannot stand in for the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
	/// The adapter does not bind the symbol at all.
	Missing,
	/// Different kinds of value (function vs class, ...).
	Kind {
		expected: &'static str,
		found: &'static str,
	},
	/// The adapter rejects calls the original accepts.
	Arity { expected: Arity, found: Arity },
	/// An exception class that is neither the original class nor a subclass.
	ExceptionIdentity { expected: String, found: String },
	/// A class lacking an attribute the original class exposes.
	MissingMember(Name),
}

impl fmt::Display for Incompatibility {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Missing => f.write_str("symbol is missing"),
			Self::Kind { expected, found } => write!(f, "expected a {expected}, found a {found}"),
			Self::Arity { expected, found } => {
				write!(f, "original accepts {expected} arguments, adapter accepts {found}")
			}
			Self::ExceptionIdentity { expected, found } => {
				write!(f, "exception {found} is not {expected} or a subclass of it")
			}
			Self::MissingMember(name) => write!(f, "class has no member '{name}'"),
		}
	}
}

/// Errors from injection and unpatched imports.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
	/// No definition is locatable for the module.
	#[error("no module named '{name}'")]
	ModuleNotFound { name: ModuleName },

	#[error(transparent)]
	InvalidModuleName(#[from] InvalidModuleName),

	#[error("'{target}' is already patched with fingerprint {existing}; refusing {requested}")]
	AlreadyPatched {
		target: ModuleName,
		existing: Fingerprint,
		requested: Fingerprint,
	},

	#[error("adapter '{adapter}' for '{dependency}' cannot stand in for '{symbol}' used by '{target}': {reason}")]
	IncompatibleAdapter {
		target: ModuleName,
		adapter: ModuleName,
		dependency: Name,
		symbol: Name,
		reason: Incompatibility,
	},

	/// The mapping names a dependency the target never imports.
	#[error("'{target}' never imports '{dependency}' at top level")]
	UnboundSubstitution { target: ModuleName, dependency: Name },

	/// Top-level code asked for the unpatched form of a substituted dependency.
	#[error("'{target}' bypasses the substitution of '{dependency}'")]
	BypassedSubstitution { target: ModuleName, dependency: Name },

	#[error("circular injection of '{target}'")]
	CircularInjection { target: ModuleName },

	#[error("cannot import name '{symbol}' from '{module}'")]
	ImportName { module: ModuleName, symbol: Name },

	/// Top-level code itself failed.
	#[error("executing '{module}' failed: {source}")]
	Execution {
		module: ModuleName,
		#[source]
		source: CallError,
	},
}

impl From<RegistryError> for InjectError {
	fn from(err: RegistryError) -> Self {
		match err {
			RegistryError::NotPatched { identity, .. } => InjectError::ModuleNotFound { name: identity },
			RegistryError::AlreadyPatched {
				identity,
				existing,
				requested,
				..
			} => InjectError::AlreadyPatched {
				target: identity,
				existing,
				requested,
			},
			RegistryError::CircularInjection { identity, .. } => InjectError::CircularInjection { target: identity },
		}
	}
}

/// Failure raised out of a module's top-level code.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
	/// A call made at top level failed.
	#[error(transparent)]
	Call(#[from] CallError),

	/// An import or nested injection failed; propagated unchanged.
	#[error(transparent)]
	Inject(#[from] Box<InjectError>),
}

impl From<InjectError> for ExecError {
	fn from(err: InjectError) -> Self {
		ExecError::Inject(Box::new(err))
	}
}

impl From<InvalidModuleName> for ExecError {
	fn from(err: InvalidModuleName) -> Self {
		ExecError::Inject(Box::new(InjectError::from(err)))
	}
}

impl ExecError {
	pub(crate) fn into_inject(self, module: &ModuleName) -> InjectError {
		match self {
			ExecError::Call(source) => InjectError::Execution {
				module: module.clone(),
				source,
			},
			ExecError::Inject(err) => *err,
		}
	}
}
