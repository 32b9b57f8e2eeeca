//! Blocking facilities and their cooperative counterparts.
//!
//! The catalog registered here holds two families of modules:
//!
//! - blocking originals: `socket`, `time`, `socket_server`, `url_fetch`,
//!   `http_server`, `simple_http_server`;
//! - adapters under `green.*` that suspend the calling task instead of the
//!   thread.
//!
//! Higher-level adapters are not rewrites. They inject the original module
//! with its blocking dependency substituted:
//!
//! ```ignore
//! let injector = greenpatch_green::injector()?;
//! let http = injector.original_named("green.simple_http_server")?;
//! // Same classes as `simple_http_server`, serving over `green.socket`.
//! ```

mod green;
mod http_server;
mod simple_http_server;
mod socket;
mod socket_server;
mod time;
mod url_fetch;

use std::future::Future;

use greenpatch_namespace::{Args, CallResult};
use greenpatch_patcher::{CatalogBuilder, CatalogError, Injector, ModuleCatalog};

pub use simple_http_server::guess_type;
pub use url_fetch::{UrlParts, quote, unquote, urlsplit};

/// Adds every facility and adapter in this crate to `builder`.
pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
	builder
		.module("socket", socket::module)
		.module("time", time::module)
		.module("socket_server", socket_server::module)
		.module("url_fetch", url_fetch::module)
		.module("http_server", http_server::module)
		.module("simple_http_server", simple_http_server::module)
		.module("green.socket", green::socket::module)
		.module("green.time", green::time::module)
		.module("green.socket_server", green::socket_server)
		.module("green.url_fetch", green::url_fetch)
		.module("green.http_server", green::http_server)
		.module("green.simple_http_server", green::simple_http_server)
}

pub fn catalog() -> Result<ModuleCatalog, CatalogError> {
	register(ModuleCatalog::builder()).build()
}

/// Injector over [`catalog`] with default options.
pub fn injector() -> Result<Injector, CatalogError> {
	Ok(Injector::new(catalog()?))
}

/// Adapts a body taking captured state into a native function body.
pub(crate) fn bind<T, F, Fut>(state: &T, body: F) -> impl Fn(Args) -> Fut + Send + Sync + 'static
where
	T: Clone + Send + Sync + 'static,
	F: Fn(T, Args) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = CallResult> + Send + 'static,
{
	let state = state.clone();
	move |args| body(state.clone(), args)
}

#[cfg(test)]
mod testing {
	use greenpatch_patcher::Injector;

	pub(crate) fn injector() -> Injector {
		let _ = tracing_subscriber::fmt::try_init();
		super::injector().expect("catalog builds")
	}
}
