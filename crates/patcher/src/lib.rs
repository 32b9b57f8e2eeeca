//! Import-time dependency substitution.
//!
//! A target module's top-level code is re-executed against an
//! [`ExecContext`] in which chosen dependencies resolve to adapter modules.
//! The result is a separate module object; the original stays untouched and
//! keeps serving every importer that did not ask for the patched copy.
//!
//! ```ignore
//! let injector = Injector::new(catalog);
//! let green_socket = injector.original_named("green.socket")?;
//! let server = injector.inject("socket_server", Substitutions::new().with("socket", green_socket))?;
//! ```
//!
//! [`Injector`] is the only entry point: it guards every execution with the
//! patched registry so import-time side effects happen at most once per
//! target.

mod catalog;
pub mod config;
mod conformance;
mod context;
mod error;
mod injector;
mod patcher;
mod substitution;

pub use catalog::{CatalogBuilder, CatalogError, ModuleBody, ModuleCatalog, ModuleDef};
pub use config::{InjectionPlan, PlanError};
pub use context::ExecContext;
pub use error::{ExecError, Incompatibility, InjectError};
pub use injector::{Injector, InjectorBuilder, PatchOptions};
pub use substitution::Substitutions;

