use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::{Args, Arity, CallError, CallResult, Function, ModuleName, Name, Value, exception};

/// A class: named attribute table plus ordered bases.
///
/// Identity is pointer identity. Two classes built from the same source text
/// in two executions are distinct, which is what makes re-executed (patched)
/// modules observable as different from their originals.
#[derive(Clone)]
pub struct Class {
	inner: Arc<ClassInner>,
}

struct ClassInner {
	name: Name,
	module: ModuleName,
	bases: Vec<Class>,
	attrs: IndexMap<Name, Value>,
}

impl Class {
	pub fn builder(name: impl Into<Name>, module: &ModuleName) -> ClassBuilder {
		ClassBuilder {
			name: name.into(),
			module: module.clone(),
			bases: Vec::new(),
			attrs: IndexMap::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn module(&self) -> &ModuleName {
		&self.inner.module
	}

	/// `module.Name`.
	pub fn qualname(&self) -> String {
		format!("{}.{}", self.inner.module, self.inner.name)
	}

	pub fn bases(&self) -> &[Class] {
		&self.inner.bases
	}

	pub fn ptr_eq(&self, other: &Class) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Reflexive, transitive subclass test by identity.
	pub fn is_subclass_of(&self, other: &Class) -> bool {
		self.ptr_eq(other) || self.inner.bases.iter().any(|base| base.is_subclass_of(other))
	}

	pub fn is_exception(&self) -> bool {
		self.is_subclass_of(exception::base_exception())
	}

	/// Attribute defined directly on this class.
	pub fn own(&self, name: &str) -> Option<&Value> {
		self.inner.attrs.get(name)
	}

	/// Attribute lookup: own table, then bases depth-first, left to right.
	pub fn lookup(&self, name: &str) -> Option<Value> {
		if let Some(value) = self.inner.attrs.get(name) {
			return Some(value.clone());
		}
		self.inner.bases.iter().find_map(|base| base.lookup(name))
	}

	/// Looks up a function attribute for an explicit (unbound) call.
	pub fn method(&self, name: &str) -> CallResult<Function> {
		match self.lookup(name) {
			Some(Value::Function(f)) => Ok(f),
			Some(other) => Err(CallError::Type {
				expected: "function",
				found: other.kind(),
			}),
			None => Err(CallError::Attribute {
				owner: Name::from(self.qualname()),
				name: Name::from(name),
			}),
		}
	}

	/// Every attribute name reachable through lookup.
	pub fn attribute_names(&self) -> IndexSet<Name> {
		let mut names: IndexSet<Name> = self.inner.attrs.keys().cloned().collect();
		for base in &self.inner.bases {
			names.extend(base.attribute_names());
		}
		names
	}

	/// Creates an instance and runs `__init__` when one is found.
	pub async fn instantiate(&self, args: Args) -> CallResult<Instance> {
		let instance = Instance::new(self.clone());
		match self.lookup("__init__") {
			Some(init) => {
				init.as_function()?
					.call(args.prepend(Value::Instance(instance.clone())))
					.await?;
			}
			None if !args.is_empty() => {
				return Err(CallError::Arity {
					function: Name::from(format!("{}()", self.qualname())),
					expected: Arity::exact(0),
					given: args.len(),
				});
			}
			None => {}
		}
		Ok(instance)
	}
}

impl fmt::Debug for Class {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<class {}>", self.qualname())
	}
}

/// Builder for [`Class`]; the attribute table is frozen by [`ClassBuilder::build`].
pub struct ClassBuilder {
	name: Name,
	module: ModuleName,
	bases: Vec<Class>,
	attrs: IndexMap<Name, Value>,
}

impl ClassBuilder {
	pub fn base(mut self, base: Class) -> Self {
		self.bases.push(base);
		self
	}

	pub fn attr(mut self, name: impl Into<Name>, value: impl Into<Value>) -> Self {
		self.attrs.insert(name.into(), value.into());
		self
	}

	/// Adds a method. `arity` counts the receiver.
	pub fn method<F, Fut>(self, name: &str, arity: Arity, body: F) -> Self
	where
		F: Fn(Args) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = CallResult> + Send + 'static,
	{
		let qualified = format!("{}.{name}", self.name);
		let function = Function::new(&self.module, qualified, arity, body);
		self.attr(name, function)
	}

	pub fn build(self) -> Class {
		Class {
			inner: Arc::new(ClassInner {
				name: self.name,
				module: self.module,
				bases: self.bases,
				attrs: self.attrs,
			}),
		}
	}
}

/// An instance: class plus a mutable field table.
///
/// The field lock is only held for the duration of a single get or set.
#[derive(Clone)]
pub struct Instance {
	inner: Arc<InstanceInner>,
}

struct InstanceInner {
	class: Class,
	fields: Mutex<IndexMap<Name, Value>>,
}

impl Instance {
	pub fn new(class: Class) -> Self {
		Self {
			inner: Arc::new(InstanceInner {
				class,
				fields: Mutex::new(IndexMap::new()),
			}),
		}
	}

	pub fn class(&self) -> &Class {
		&self.inner.class
	}

	pub fn ptr_eq(&self, other: &Instance) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn is_instance_of(&self, class: &Class) -> bool {
		self.inner.class.is_subclass_of(class)
	}

	/// Field set directly on the instance.
	pub fn field(&self, name: &str) -> Option<Value> {
		self.inner.fields.lock().get(name).cloned()
	}

	pub fn set(&self, name: impl Into<Name>, value: impl Into<Value>) {
		self.inner.fields.lock().insert(name.into(), value.into());
	}

	/// Field, falling back to class attributes.
	pub fn get(&self, name: &str) -> CallResult<Value> {
		self.field(name)
			.or_else(|| self.inner.class.lookup(name))
			.ok_or_else(|| CallError::Attribute {
				owner: Name::from(self.inner.class.qualname()),
				name: Name::from(name),
			})
	}

	pub fn has(&self, name: &str) -> bool {
		self.field(name).is_some() || self.inner.class.lookup(name).is_some()
	}

	/// Native payload stored in field `name`.
	pub fn opaque<T: Any + Send + Sync>(&self, name: &str) -> CallResult<Arc<T>> {
		match self.get(name)? {
			Value::Opaque(o) => o.downcast::<T>().ok_or(CallError::Type {
				expected: std::any::type_name::<T>(),
				found: "opaque",
			}),
			other => Err(CallError::Type {
				expected: "opaque",
				found: other.kind(),
			}),
		}
	}

	/// Calls `name`, binding the receiver when it resolves to a class function.
	pub async fn call_method(&self, name: &str, args: impl Into<Args>) -> CallResult {
		let args = args.into();
		if let Some(value) = self.field(name) {
			return value.call(args).await;
		}
		match self.inner.class.lookup(name) {
			Some(Value::Function(f)) => f.call(args.prepend(Value::Instance(self.clone()))).await,
			Some(other) => other.call(args).await,
			None => Err(CallError::Attribute {
				owner: Name::from(self.inner.class.qualname()),
				name: Name::from(name),
			}),
		}
	}
}

impl fmt::Debug for Instance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<{} instance>", self.inner.class.qualname())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn module() -> ModuleName {
		ModuleName::parse("shapes").unwrap()
	}

	fn base() -> Class {
		Class::builder("Shape", &module())
			.attr("sides", 0i64)
			.method("__init__", Arity::exact(2), |args: Args| async move {
				args.receiver()?.set("label", args.get(1)?.clone());
				Ok(Value::None)
			})
			.method("describe", Arity::exact(1), |args: Args| async move {
				let this = args.receiver()?;
				let sides = this.get("sides")?.as_int()?;
				Ok(Value::from(format!("{} with {sides} sides", this.get("label")?.as_str()?)))
			})
			.build()
	}

	#[test]
	fn lookup_walks_bases() {
		let shape = base();
		let square = Class::builder("Square", &module()).base(shape.clone()).attr("sides", 4i64).build();
		assert_eq!(square.lookup("sides"), Some(Value::Int(4)));
		assert!(square.lookup("describe").is_some());
		assert!(square.is_subclass_of(&shape));
		assert!(!shape.is_subclass_of(&square));
		let names: Vec<_> = square.attribute_names().into_iter().collect();
		assert_eq!(names.len(), 3);
	}

	#[tokio::test]
	async fn instances_dispatch_to_overrides() {
		let shape = base();
		let square = Class::builder("Square", &module()).base(shape).attr("sides", 4i64).build();
		let sq = square.instantiate(Args::from([Value::from("box")])).await.unwrap();
		let described = sq.call_method("describe", ()).await.unwrap();
		assert_eq!(described, Value::from("box with 4 sides"));

		let err = sq.call_method("area", ()).await.unwrap_err();
		assert!(matches!(err, CallError::Attribute { .. }));
	}

	#[tokio::test]
	async fn classes_without_init_reject_arguments() {
		let plain = Class::builder("Plain", &module()).build();
		assert!(plain.instantiate(Args::new()).await.is_ok());
		assert!(plain.instantiate(Args::from([Value::Int(1)])).await.is_err());
	}
}
