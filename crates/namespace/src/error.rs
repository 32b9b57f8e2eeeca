use crate::{Arity, Class, Exception, ModuleName, Name, Value};

/// Errors surfaced when calling into module code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
	/// An exception raised by the callee.
	#[error("{0}")]
	Raised(Exception),

	/// A module-level name referenced from a function body is missing at call
	/// time. Never resolved against any other module.
	#[error("module '{module}' has no attribute '{name}'")]
	LateBindingAttribute { module: ModuleName, name: Name },

	/// A function body ran before its defining module finished executing.
	#[error("module '{module}' is still executing")]
	Executing { module: ModuleName },

	#[error("'{owner}' has no attribute '{name}'")]
	Attribute { owner: Name, name: Name },

	#[error("expected {expected}, found {found}")]
	Type {
		expected: &'static str,
		found: &'static str,
	},

	#[error("{function}() takes {expected} positional arguments but {given} were given")]
	Arity {
		function: Name,
		expected: Arity,
		given: usize,
	},

	#[error("'{0}' object is not callable")]
	NotCallable(&'static str),
}

impl CallError {
	/// Shorthand for raising an exception of `class`.
	pub fn raise(class: &Class, message: impl Into<std::sync::Arc<str>>) -> Self {
		CallError::Raised(Exception::new(class, message))
	}

	pub fn exception(&self) -> Option<&Exception> {
		match self {
			CallError::Raised(e) => Some(e),
			_ => None,
		}
	}

	/// `except class:` semantics; only raised exceptions match.
	pub fn is_instance_of(&self, class: &Class) -> bool {
		self.exception().is_some_and(|e| e.matches(class))
	}
}

/// Result of a call.
pub type CallResult<T = Value> = Result<T, CallError>;
