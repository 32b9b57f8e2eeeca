//! Cooperative adapters.
//!
//! `green.socket` and `green.time` are written by hand against tokio. The
//! rest are the original modules re-executed with their blocking
//! dependencies substituted, so `green.http_server.HTTPServer` is the
//! original server code serving over `green.socket`.

pub(crate) mod socket;
pub(crate) mod time;

use greenpatch_patcher::{ExecContext, ExecError, Substitutions};

pub(crate) fn socket_server(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let socket = ctx.original("green.socket")?;
	ctx.inject_into("socket_server", Substitutions::new().with("socket", socket))?;
	Ok(())
}

pub(crate) fn url_fetch(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let socket = ctx.original("green.socket")?;
	ctx.inject_into("url_fetch", Substitutions::new().with("socket", socket))?;
	Ok(())
}

pub(crate) fn http_server(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let socket_server = ctx.original("green.socket_server")?;
	ctx.inject_into("http_server", Substitutions::new().with("socket_server", socket_server))?;
	Ok(())
}

pub(crate) fn simple_http_server(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let substitutions = Substitutions::new()
		.with("http_server", ctx.original("green.http_server")?)
		.with("url_fetch", ctx.original("green.url_fetch")?);
	ctx.inject_into("simple_http_server", substitutions)?;
	Ok(())
}
