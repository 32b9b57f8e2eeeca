//! Best-effort adapter conformance.
//!
//! Only what top-level execution actually touched can be checked; names read
//! lazily from function bodies are validated on first call by
//! [`greenpatch_namespace::Module::attr`].

use greenpatch_namespace::{Class, Module, ModuleName, Name, Value};
use indexmap::IndexSet;

use crate::context::Reference;
use crate::{Incompatibility, InjectError, Injector, PatchOptions, Substitutions};

/// Checks an executed target against its substitution table.
pub(crate) fn check(
	injector: &Injector,
	target: &ModuleName,
	substitutions: &Substitutions,
	imported: &IndexSet<Name>,
	references: &IndexSet<Reference>,
	options: &PatchOptions,
) -> Result<(), InjectError> {
	if options.require_bound_substitutions {
		for (dependency, _) in substitutions.iter() {
			if !imported.contains(dependency) {
				return Err(InjectError::UnboundSubstitution {
					target: target.clone(),
					dependency: Name::from(dependency),
				});
			}
		}
	}

	for reference in references {
		let Some(adapter) = substitutions.adapter_for(&reference.dependency) else {
			continue;
		};
		let incompatible = |reason| InjectError::IncompatibleAdapter {
			target: target.clone(),
			adapter: adapter.name().clone(),
			dependency: reference.dependency.clone(),
			symbol: reference.symbol.clone(),
			reason,
		};

		let Some(replacement) = adapter.get(&reference.symbol) else {
			return Err(incompatible(Incompatibility::Missing));
		};
		if !options.verify_shapes {
			continue;
		}
		let Some(original) = original_facility(injector, &reference.dependency)? else {
			continue;
		};
		let Some(expected) = original.get(&reference.symbol) else {
			continue;
		};
		if let Err(reason) = compare(expected, replacement) {
			return Err(incompatible(reason));
		}
	}
	Ok(())
}

/// The unpatched module a dependency name refers to, if one is locatable.
fn original_facility(injector: &Injector, dependency: &str) -> Result<Option<Module>, InjectError> {
	let name = ModuleName::parse(dependency)?;
	match injector.original(&name) {
		Ok(module) => Ok(Some(module)),
		Err(InjectError::ModuleNotFound { name: missing }) if missing == name => Ok(None),
		Err(err) => Err(err),
	}
}

/// Compares an original value against its replacement.
pub(crate) fn compare(expected: &Value, found: &Value) -> Result<(), Incompatibility> {
	match (expected, found) {
		(Value::Function(original), Value::Function(adapter)) => {
			if adapter.arity().covers(original.arity()) {
				Ok(())
			} else {
				Err(Incompatibility::Arity {
					expected: original.arity(),
					found: adapter.arity(),
				})
			}
		}
		(Value::Class(original), Value::Class(adapter)) => compare_classes(original, adapter),
		(expected, found) if expected.kind() == found.kind() => Ok(()),
		(expected, found) => Err(Incompatibility::Kind {
			expected: expected.kind(),
			found: found.kind(),
		}),
	}
}

fn compare_classes(original: &Class, adapter: &Class) -> Result<(), Incompatibility> {
	if original.is_exception() {
		return if adapter.is_subclass_of(original) {
			Ok(())
		} else {
			Err(Incompatibility::ExceptionIdentity {
				expected: original.qualname(),
				found: adapter.qualname(),
			})
		};
	}
	if adapter.is_subclass_of(original) {
		return Ok(());
	}
	let available = adapter.attribute_names();
	match original.attribute_names().into_iter().find(|name| !available.contains(name)) {
		Some(missing) => Err(Incompatibility::MissingMember(missing)),
		None => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use greenpatch_namespace::{Arity, Function, exception};

	use super::*;

	fn module() -> ModuleName {
		ModuleName::parse("facility").unwrap()
	}

	fn function(arity: Arity) -> Value {
		Value::Function(Function::new(&module(), "f", arity, |_| async { Ok(Value::None) }))
	}

	#[test]
	fn functions_must_accept_original_calls() {
		assert!(compare(&function(Arity::exact(1)), &function(Arity::range(1, 2))).is_ok());
		assert_eq!(
			compare(&function(Arity::range(1, 2)), &function(Arity::exact(1))),
			Err(Incompatibility::Arity {
				expected: Arity::range(1, 2),
				found: Arity::exact(1),
			})
		);
	}

	#[test]
	fn kinds_must_match() {
		assert!(compare(&Value::Int(1), &Value::Int(2)).is_ok());
		assert_eq!(
			compare(&function(Arity::exact(0)), &Value::Int(0)),
			Err(Incompatibility::Kind {
				expected: "function",
				found: "int",
			})
		);
	}

	#[test]
	fn exception_classes_keep_identity() {
		let error = Class::builder("error", &module()).base(exception::os_error().clone()).build();
		let sub = Class::builder("error", &module()).base(error.clone()).build();
		let copy = Class::builder("error", &module()).base(exception::os_error().clone()).build();

		assert!(compare(&Value::Class(error.clone()), &Value::Class(error.clone())).is_ok());
		assert!(compare(&Value::Class(error.clone()), &Value::Class(sub)).is_ok());
		assert!(matches!(
			compare(&Value::Class(error), &Value::Class(copy)),
			Err(Incompatibility::ExceptionIdentity { .. })
		));
	}

	#[test]
	fn plain_classes_need_the_same_surface() {
		let original = Class::builder("Server", &module()).attr("serve", 1i64).attr("close", 1i64).build();
		let same = Class::builder("Server", &module()).attr("serve", 2i64).attr("close", 2i64).build();
		let partial = Class::builder("Server", &module()).attr("serve", 2i64).build();

		assert!(compare(&Value::Class(original.clone()), &Value::Class(same)).is_ok());
		assert_eq!(
			compare(&Value::Class(original), &Value::Class(partial)),
			Err(Incompatibility::MissingMember(Name::from("close")))
		);
	}
}
