use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{BoxFuture, CallError, CallResult, Class, Function, Instance, Module};

/// Interned-ish binding name.
pub type Name = Arc<str>;

/// A value bound in a module namespace or passed through a call.
#[derive(Clone, Default)]
pub enum Value {
	#[default]
	None,
	Bool(bool),
	Int(i64),
	Str(Arc<str>),
	Bytes(Arc<[u8]>),
	List(Arc<[Value]>),
	Function(Function),
	Class(Class),
	Instance(Instance),
	Module(Module),
	/// Native handle owned by a facility (a socket, a listener, a path).
	Opaque(Opaque),
}

impl Value {
	/// Short kind name used in diagnostics and shape checks.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::None => "none",
			Value::Bool(_) => "bool",
			Value::Int(_) => "int",
			Value::Str(_) => "str",
			Value::Bytes(_) => "bytes",
			Value::List(_) => "list",
			Value::Function(_) => "function",
			Value::Class(_) => "class",
			Value::Instance(_) => "instance",
			Value::Module(_) => "module",
			Value::Opaque(_) => "opaque",
		}
	}

	/// Identity for reference kinds, equality for plain data.
	pub fn same(a: &Value, b: &Value) -> bool {
		match (a, b) {
			(Value::None, Value::None) => true,
			(Value::Bool(x), Value::Bool(y)) => x == y,
			(Value::Int(x), Value::Int(y)) => x == y,
			(Value::Str(x), Value::Str(y)) => x == y,
			(Value::Bytes(x), Value::Bytes(y)) => x == y,
			(Value::List(x), Value::List(y)) => {
				x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| Value::same(a, b))
			}
			(Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
			(Value::Class(x), Value::Class(y)) => x.ptr_eq(y),
			(Value::Instance(x), Value::Instance(y)) => x.ptr_eq(y),
			(Value::Module(x), Value::Module(y)) => x.ptr_eq(y),
			(Value::Opaque(x), Value::Opaque(y)) => Arc::ptr_eq(&x.0, &y.0),
			_ => false,
		}
	}

	pub fn is_none(&self) -> bool {
		matches!(self, Value::None)
	}

	/// Python-style truthiness.
	pub fn truthy(&self) -> bool {
		match self {
			Value::None => false,
			Value::Bool(b) => *b,
			Value::Int(i) => *i != 0,
			Value::Str(s) => !s.is_empty(),
			Value::Bytes(b) => !b.is_empty(),
			Value::List(l) => !l.is_empty(),
			_ => true,
		}
	}

	fn mismatch(&self, expected: &'static str) -> CallError {
		CallError::Type {
			expected,
			found: self.kind(),
		}
	}

	pub fn as_bool(&self) -> CallResult<bool> {
		match self {
			Value::Bool(b) => Ok(*b),
			other => Err(other.mismatch("bool")),
		}
	}

	pub fn as_int(&self) -> CallResult<i64> {
		match self {
			Value::Int(i) => Ok(*i),
			other => Err(other.mismatch("int")),
		}
	}

	pub fn as_str(&self) -> CallResult<&str> {
		match self {
			Value::Str(s) => Ok(s),
			other => Err(other.mismatch("str")),
		}
	}

	/// Bytes, with `str` accepted as its UTF-8 encoding.
	pub fn as_bytes(&self) -> CallResult<&[u8]> {
		match self {
			Value::Bytes(b) => Ok(b),
			Value::Str(s) => Ok(s.as_bytes()),
			other => Err(other.mismatch("bytes")),
		}
	}

	pub fn as_list(&self) -> CallResult<&[Value]> {
		match self {
			Value::List(l) => Ok(l),
			other => Err(other.mismatch("list")),
		}
	}

	pub fn as_function(&self) -> CallResult<&Function> {
		match self {
			Value::Function(f) => Ok(f),
			other => Err(other.mismatch("function")),
		}
	}

	pub fn as_class(&self) -> CallResult<&Class> {
		match self {
			Value::Class(c) => Ok(c),
			other => Err(other.mismatch("class")),
		}
	}

	pub fn as_instance(&self) -> CallResult<&Instance> {
		match self {
			Value::Instance(i) => Ok(i),
			other => Err(other.mismatch("instance")),
		}
	}

	pub fn as_module(&self) -> CallResult<&Module> {
		match self {
			Value::Module(m) => Ok(m),
			other => Err(other.mismatch("module")),
		}
	}

	/// Calls a function or instantiates a class.
	pub fn call(&self, args: impl Into<Args>) -> BoxFuture<CallResult> {
		let args = args.into();
		match self {
			Value::Function(f) => f.call(args),
			Value::Class(c) => {
				let class = c.clone();
				Box::pin(async move { class.instantiate(args).await.map(Value::Instance) })
			}
			other => {
				let err = CallError::NotCallable(other.kind());
				Box::pin(async move { Err(err) })
			}
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		Value::same(self, other)
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::None => f.write_str("None"),
			Value::Bool(b) => write!(f, "{b}"),
			Value::Int(i) => write!(f, "{i}"),
			Value::Str(s) => write!(f, "{s:?}"),
			Value::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
			Value::List(l) => f.debug_list().entries(l.iter()).finish(),
			Value::Function(func) => write!(f, "<function {}.{}>", func.module(), func.name()),
			Value::Class(c) => write!(f, "<class {}>", c.qualname()),
			Value::Instance(i) => write!(f, "<{} instance>", i.class().qualname()),
			Value::Module(m) => write!(f, "<module {}>", m.name()),
			Value::Opaque(_) => f.write_str("<opaque>"),
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<usize> for Value {
	fn from(v: usize) -> Self {
		Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Str(Arc::from(v))
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Str(Arc::from(v))
	}
}

impl From<Vec<u8>> for Value {
	fn from(v: Vec<u8>) -> Self {
		Value::Bytes(Arc::from(v))
	}
}

impl From<&[u8]> for Value {
	fn from(v: &[u8]) -> Self {
		Value::Bytes(Arc::from(v))
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::List(Arc::from(v))
	}
}

impl From<Function> for Value {
	fn from(v: Function) -> Self {
		Value::Function(v)
	}
}

impl From<Class> for Value {
	fn from(v: Class) -> Self {
		Value::Class(v)
	}
}

impl From<Instance> for Value {
	fn from(v: Instance) -> Self {
		Value::Instance(v)
	}
}

impl From<Module> for Value {
	fn from(v: Module) -> Self {
		Value::Module(v)
	}
}

impl From<Opaque> for Value {
	fn from(v: Opaque) -> Self {
		Value::Opaque(v)
	}
}

/// Type-erased native payload.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
	pub fn new<T: Any + Send + Sync>(value: T) -> Self {
		Self(Arc::new(value))
	}

	pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		Arc::clone(&self.0).downcast::<T>().ok()
	}
}

/// Positional call arguments. Methods receive their instance at index 0.
#[derive(Clone, Default, Debug)]
pub struct Args(Vec<Value>);

impl Args {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, index: usize) -> CallResult<&Value> {
		self.0.get(index).ok_or(CallError::Type {
			expected: "argument",
			found: "nothing",
		})
	}

	/// Optional trailing argument; `None` values count as absent.
	pub fn opt(&self, index: usize) -> Option<&Value> {
		self.0.get(index).filter(|v| !v.is_none())
	}

	pub fn int(&self, index: usize) -> CallResult<i64> {
		self.get(index)?.as_int()
	}

	pub fn str(&self, index: usize) -> CallResult<&str> {
		self.get(index)?.as_str()
	}

	pub fn bytes(&self, index: usize) -> CallResult<&[u8]> {
		self.get(index)?.as_bytes()
	}

	pub fn instance(&self, index: usize) -> CallResult<&Instance> {
		self.get(index)?.as_instance()
	}

	pub fn class(&self, index: usize) -> CallResult<&Class> {
		self.get(index)?.as_class()
	}

	/// The bound instance of a method call.
	pub fn receiver(&self) -> CallResult<&Instance> {
		self.instance(0)
	}

	/// Returns a copy with `first` inserted at the front.
	pub fn prepend(&self, first: Value) -> Args {
		let mut values = Vec::with_capacity(self.0.len() + 1);
		values.push(first);
		values.extend(self.0.iter().cloned());
		Args(values)
	}

	/// Returns the arguments after the first `n`.
	pub fn skip(&self, n: usize) -> Args {
		Args(self.0.iter().skip(n).cloned().collect())
	}

	pub fn iter(&self) -> impl Iterator<Item = &Value> {
		self.0.iter()
	}

	pub fn into_vec(self) -> Vec<Value> {
		self.0
	}
}

impl From<Vec<Value>> for Args {
	fn from(v: Vec<Value>) -> Self {
		Args(v)
	}
}

impl<const N: usize> From<[Value; N]> for Args {
	fn from(v: [Value; N]) -> Self {
		Args(v.into())
	}
}

impl From<()> for Args {
	fn from(_: ()) -> Self {
		Args::default()
	}
}

impl FromIterator<Value> for Args {
	fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
		Args(iter.into_iter().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_data_compares_by_value() {
		assert_eq!(Value::from("a"), Value::from("a"));
		assert_eq!(Value::from(vec![Value::Int(1), Value::None]), Value::from(vec![Value::Int(1), Value::None]));
		assert_ne!(Value::Int(1), Value::Bool(true));
	}

	#[test]
	fn opaque_compares_by_identity() {
		let a = Opaque::new(5u32);
		let b = Opaque::new(5u32);
		assert_eq!(Value::Opaque(a.clone()), Value::Opaque(a.clone()));
		assert_ne!(Value::Opaque(a.clone()), Value::Opaque(b));
		assert_eq!(*a.downcast::<u32>().unwrap(), 5);
		assert!(a.downcast::<String>().is_none());
	}

	#[test]
	fn args_accessors_report_kind_mismatch() {
		let args = Args::from([Value::from("x"), Value::Int(3)]);
		assert_eq!(args.str(0).unwrap(), "x");
		assert_eq!(args.int(1).unwrap(), 3);
		assert!(matches!(
			args.int(0),
			Err(CallError::Type {
				expected: "int",
				found: "str"
			})
		));
		assert!(args.get(2).is_err());
		assert_eq!(args.skip(1).len(), 1);
	}

	#[tokio::test]
	async fn calling_plain_data_fails() {
		let err = Value::Int(1).call(()).await.unwrap_err();
		assert!(matches!(err, CallError::NotCallable("int")));
	}
}
