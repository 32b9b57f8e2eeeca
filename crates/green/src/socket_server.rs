//! Generic request/response servers over the `socket` facility.
//!
//! Sockets are only reached through this module's `socket` binding, looked up
//! when a server is constructed, so a copy with `socket` substituted serves
//! over the substitute.

use greenpatch_namespace::{Args, Arity, CallResult, Class, Globals, Value, exception};
use greenpatch_patcher::{ExecContext, ExecError};

use crate::bind;

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import("socket")?;
	let globals = ctx.globals();

	let base_server = Class::builder("BaseServer", ctx.module_name())
		.method("__init__", Arity::exact(3), base_server_init)
		.method("handle_request", Arity::exact(1), handle_request)
		.method("serve_once", Arity::exact(1), handle_request)
		.method("serve_forever", Arity::exact(1), serve_forever)
		.method("process_request", Arity::exact(3), process_request)
		.method("finish_request", Arity::exact(3), finish_request)
		.method("shutdown_request", Arity::exact(2), shutdown_request)
		.method("handle_error", Arity::exact(4), handle_error)
		.method("server_close", Arity::exact(1), base_server_close)
		.build();
	let tcp_server = Class::builder("TCPServer", ctx.module_name())
		.base(base_server.clone())
		.method(
			"__init__",
			Arity::exact(3),
			bind(&(base_server.clone(), globals), |(base, globals), args| {
				tcp_server_init(base, globals, args)
			}),
		)
		.method("get_request", Arity::exact(1), get_request)
		.method("server_close", Arity::exact(1), bind(&base_server, tcp_server_close))
		.build();

	let base_handler = Class::builder("BaseRequestHandler", ctx.module_name())
		.method("__init__", Arity::exact(4), handler_init)
		.method("setup", Arity::exact(1), |_| async { Ok(Value::None) })
		.method("handle", Arity::exact(1), |_| async { Ok(Value::None) })
		.method("finish", Arity::exact(1), |_| async { Ok(Value::None) })
		.build();
	let stream_handler = Class::builder("StreamRequestHandler", ctx.module_name())
		.base(base_handler.clone())
		.method("setup", Arity::exact(1), stream_setup)
		.build();

	ctx.define("BaseServer", base_server);
	ctx.define("TCPServer", tcp_server);
	ctx.define("BaseRequestHandler", base_handler);
	ctx.define("StreamRequestHandler", stream_handler);
	Ok(())
}

fn closed(server: &greenpatch_namespace::Instance) -> bool {
	server.field("_closed").is_some_and(|v| v.truthy())
}

async fn base_server_init(args: Args) -> CallResult {
	let this = args.receiver()?;
	this.set("server_address", args.get(1)?.clone());
	this.set("RequestHandlerClass", args.get(2)?.clone());
	this.set("_closed", false);
	Ok(Value::None)
}

/// Accepts one connection and runs the handler class over it.
async fn handle_request(args: Args) -> CallResult {
	let this = args.receiver()?;
	let request = this.call_method("get_request", ()).await?;
	let client_address = request.as_instance()?.call_method("peer", ()).await?;
	tracing::debug!(client = ?client_address, "socket_server.request");

	let processed = this
		.call_method("process_request", [request.clone(), client_address.clone()])
		.await;
	if let Err(err) = processed {
		let message = Value::from(err.to_string());
		this.call_method("handle_error", [request.clone(), client_address, message])
			.await?;
		this.call_method("shutdown_request", [request]).await?;
	}
	Ok(Value::None)
}

/// Handles requests until `server_close` is called.
async fn serve_forever(args: Args) -> CallResult {
	let this = args.receiver()?;
	while !closed(this) {
		if let Err(err) = this.call_method("handle_request", ()).await {
			if closed(this) || err.is_instance_of(exception::cancelled_error()) {
				break;
			}
			return Err(err);
		}
	}
	tracing::debug!("socket_server.stopped");
	Ok(Value::None)
}

async fn process_request(args: Args) -> CallResult {
	let this = args.receiver()?;
	let request = args.get(1)?.clone();
	this.call_method("finish_request", [request.clone(), args.get(2)?.clone()])
		.await?;
	this.call_method("shutdown_request", [request]).await
}

async fn finish_request(args: Args) -> CallResult {
	let this = args.receiver()?;
	let handler = this.get("RequestHandlerClass")?;
	handler
		.call([args.get(1)?.clone(), args.get(2)?.clone(), Value::Instance(this.clone())])
		.await?;
	Ok(Value::None)
}

async fn shutdown_request(args: Args) -> CallResult {
	args.instance(1)?.call_method("close", ()).await
}

async fn handle_error(args: Args) -> CallResult {
	tracing::warn!(
		client = ?args.get(2)?,
		error = args.str(3)?,
		"socket_server.handler_failed"
	);
	Ok(Value::None)
}

async fn base_server_close(args: Args) -> CallResult {
	args.receiver()?.set("_closed", true);
	Ok(Value::None)
}

async fn tcp_server_init(base: Class, globals: Globals, args: Args) -> CallResult {
	base.method("__init__")?.call(args.clone()).await?;
	let this = args.receiver()?;
	let socket = globals.import("socket")?;
	let listener = socket.call("listen", [args.get(1)?.clone()]).await?;
	let address = listener.as_instance()?.call_method("address", ()).await?;
	this.set("socket", listener);
	this.set("server_address", address);
	Ok(Value::None)
}

async fn get_request(args: Args) -> CallResult {
	let listener = args.receiver()?.get("socket")?;
	listener.as_instance()?.call_method("accept", ()).await
}

async fn tcp_server_close(base: Class, args: Args) -> CallResult {
	base.method("server_close")?.call(args.clone()).await?;
	let listener = args.receiver()?.get("socket")?;
	listener.as_instance()?.call_method("close", ()).await
}

async fn handler_init(args: Args) -> CallResult {
	let this = args.receiver()?;
	this.set("request", args.get(1)?.clone());
	this.set("client_address", args.get(2)?.clone());
	this.set("server", args.get(3)?.clone());
	this.call_method("setup", ()).await?;
	let handled = this.call_method("handle", ()).await;
	let finished = this.call_method("finish", ()).await;
	handled?;
	finished?;
	Ok(Value::None)
}

async fn stream_setup(args: Args) -> CallResult {
	let this = args.receiver()?;
	let request = this.get("request")?;
	this.set("rfile", request.clone());
	this.set("wfile", request);
	Ok(Value::None)
}
