use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Args, CallError, CallResult, ModuleName, Name, Value};

/// A pinned, boxed future that is required to be Send and 'static.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type Body = dyn Fn(Args) -> BoxFuture<CallResult> + Send + Sync;

/// Accepted positional argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
	pub min: usize,
	pub max: Option<usize>,
}

impl Arity {
	pub const fn exact(n: usize) -> Self {
		Self { min: n, max: Some(n) }
	}

	pub const fn at_least(n: usize) -> Self {
		Self { min: n, max: None }
	}

	pub const fn range(min: usize, max: usize) -> Self {
		Self { min, max: Some(max) }
	}

	pub fn accepts(self, given: usize) -> bool {
		given >= self.min && self.max.is_none_or(|max| given <= max)
	}

	/// Returns true if every call accepted by `other` is accepted by `self`.
	pub fn covers(self, other: Arity) -> bool {
		self.min <= other.min
			&& match (self.max, other.max) {
				(None, _) => true,
				(Some(_), None) => false,
				(Some(mine), Some(theirs)) => mine >= theirs,
			}
	}
}

impl fmt::Display for Arity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.max {
			Some(max) if max == self.min => write!(f, "exactly {max}"),
			Some(max) => write!(f, "from {} to {max}", self.min),
			None => write!(f, "at least {}", self.min),
		}
	}
}

/// A callable binding.
///
/// Bodies are async so that adapters can suspend at I/O boundaries; blocking
/// facilities simply never yield. Identity is pointer identity.
#[derive(Clone)]
pub struct Function {
	inner: Arc<FunctionInner>,
}

struct FunctionInner {
	name: Name,
	module: ModuleName,
	arity: Arity,
	body: Box<Body>,
}

impl Function {
	pub fn new<F, Fut>(module: &ModuleName, name: impl Into<Name>, arity: Arity, body: F) -> Self
	where
		F: Fn(Args) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = CallResult> + Send + 'static,
	{
		Self {
			inner: Arc::new(FunctionInner {
				name: name.into(),
				module: module.clone(),
				arity,
				body: Box::new(move |args| -> BoxFuture<CallResult> { Box::pin(body(args)) }),
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn module(&self) -> &ModuleName {
		&self.inner.module
	}

	pub fn arity(&self) -> Arity {
		self.inner.arity
	}

	pub fn ptr_eq(&self, other: &Function) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Invokes the body after checking the argument count.
	pub fn call(&self, args: impl Into<Args>) -> BoxFuture<CallResult> {
		let args = args.into();
		if !self.inner.arity.accepts(args.len()) {
			let err = CallError::Arity {
				function: self.inner.name.clone(),
				expected: self.inner.arity,
				given: args.len(),
			};
			return Box::pin(async move { Err(err) });
		}
		(self.inner.body)(args)
	}
}

impl fmt::Debug for Function {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Function")
			.field("module", &self.inner.module)
			.field("name", &self.inner.name)
			.field("arity", &self.inner.arity)
			.finish()
	}
}

impl From<&Function> for Value {
	fn from(f: &Function) -> Self {
		Value::Function(f.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn module() -> ModuleName {
		ModuleName::parse("m").unwrap()
	}

	#[test]
	fn arity_covers_wider_ranges() {
		assert!(Arity::at_least(1).covers(Arity::range(1, 3)));
		assert!(Arity::range(0, 4).covers(Arity::exact(2)));
		assert!(!Arity::exact(2).covers(Arity::range(1, 2)));
		assert!(!Arity::range(1, 2).covers(Arity::at_least(1)));
	}

	#[tokio::test]
	async fn call_checks_arity_before_body() {
		let double = Function::new(&module(), "double", Arity::exact(1), |args: Args| async move {
			Ok(Value::Int(args.int(0)? * 2))
		});
		assert_eq!(double.call([Value::Int(21)]).await.unwrap(), Value::Int(42));

		let err = double.call(()).await.unwrap_err();
		assert!(matches!(err, CallError::Arity { given: 0, .. }));
	}

	#[test]
	fn clones_share_identity() {
		let f = Function::new(&module(), "f", Arity::exact(0), |_| async { Ok(Value::None) });
		let g = Function::new(&module(), "f", Arity::exact(0), |_| async { Ok(Value::None) });
		assert!(f.ptr_eq(&f.clone()));
		assert!(!f.ptr_eq(&g));
	}
}
