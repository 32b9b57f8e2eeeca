//! Raised exceptions and the builtin exception hierarchy.
//!
//! Builtin classes are process-wide singletons: patched and unpatched code
//! observe the same class objects, so handlers written against the original
//! facility keep matching errors raised through an adapter.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::{CallError, Class, ModuleName};

/// An exception in flight: an exception class and a message.
#[derive(Clone)]
pub struct Exception {
	class: Class,
	message: Arc<str>,
}

impl Exception {
	pub fn new(class: &Class, message: impl Into<Arc<str>>) -> Self {
		Self {
			class: class.clone(),
			message: message.into(),
		}
	}

	pub fn class(&self) -> &Class {
		&self.class
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	/// `except class:` semantics.
	pub fn matches(&self, class: &Class) -> bool {
		self.class.is_subclass_of(class)
	}
}

impl fmt::Display for Exception {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.class.name(), self.message)
	}
}

impl fmt::Debug for Exception {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({:?})", self.class.qualname(), self.message)
	}
}

impl From<Exception> for CallError {
	fn from(e: Exception) -> Self {
		CallError::Raised(e)
	}
}

struct Builtins {
	base_exception: Class,
	exception: Class,
	os_error: Class,
	timeout_error: Class,
	lookup_error: Class,
	value_error: Class,
	cancelled_error: Class,
}

fn builtins() -> &'static Builtins {
	static BUILTINS: OnceLock<Builtins> = OnceLock::new();
	BUILTINS.get_or_init(|| {
		let module = ModuleName::builtins();
		let base_exception = Class::builder("BaseException", &module).build();
		let exception = Class::builder("Exception", &module).base(base_exception.clone()).build();
		let os_error = Class::builder("OSError", &module).base(exception.clone()).build();
		Builtins {
			timeout_error: Class::builder("TimeoutError", &module).base(os_error.clone()).build(),
			lookup_error: Class::builder("LookupError", &module).base(exception.clone()).build(),
			value_error: Class::builder("ValueError", &module).base(exception.clone()).build(),
			cancelled_error: Class::builder("CancelledError", &module).base(base_exception.clone()).build(),
			base_exception,
			exception,
			os_error,
		}
	})
}

pub fn base_exception() -> &'static Class {
	&builtins().base_exception
}

pub fn exception() -> &'static Class {
	&builtins().exception
}

pub fn os_error() -> &'static Class {
	&builtins().os_error
}

pub fn timeout_error() -> &'static Class {
	&builtins().timeout_error
}

pub fn lookup_error() -> &'static Class {
	&builtins().lookup_error
}

pub fn value_error() -> &'static Class {
	&builtins().value_error
}

/// Raised into a suspended operation that was cancelled.
pub fn cancelled_error() -> &'static Class {
	&builtins().cancelled_error
}
