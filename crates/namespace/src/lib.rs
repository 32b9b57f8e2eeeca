//! Module object model.
//!
//! Target modules, adapters and the injection core all speak in terms of
//! these types: a [`Module`] is a frozen set of name to [`Value`] bindings
//! produced by running a module's top-level code once. Functions are async so
//! that adapters can suspend where an original facility would block the
//! thread; classes and exceptions carry identity so type checks written
//! against an original facility keep working across substituted copies.

mod class;
mod error;
pub mod exception;
mod function;
mod module;
mod name;
mod value;

pub use class::{Class, ClassBuilder, Instance};
pub use error::{CallError, CallResult};
pub use exception::Exception;
pub use function::{Arity, BoxFuture, Function};
pub use module::{Globals, Module, ModuleId, ModuleOrigin, NamespaceBuilder};
pub use name::{InvalidModuleName, ModuleName};
pub use value::{Args, Name, Opaque, Value};
