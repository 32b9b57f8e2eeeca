//! Cooperative TCP sockets over `tokio::net`.
//!
//! # Role
//!
//! Same surface as [`crate::socket`], but every operation that would block
//! suspends the calling task instead, so other tasks on the same runtime keep
//! running. The exception classes are the original module's objects.
//!
//! # Invariants
//!
//! - `Listener.close()` cancels pending and future `accept` calls; they raise
//!   the builtin `CancelledError`.
//! - `connect(addr, timeout_ms)` raises `socket.timeout` once the deadline
//!   passes, not a generic error.
//! - No lock guard is held across an await except the per-connection async
//!   stream lock.

use std::sync::Arc;

use greenpatch_namespace::{Args, Arity, CallError, CallResult, Class, Function, Value, exception};
use greenpatch_patcher::{ExecContext, ExecError};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::bind;
use crate::socket::{Errors, HANDLE, line_limit, read_len, timeout_arg, wrap};

struct Stream {
	io: tokio::sync::Mutex<Option<BufReader<TcpStream>>>,
	peer: String,
}

impl Stream {
	fn new(stream: TcpStream) -> std::io::Result<Self> {
		let peer = stream.peer_addr()?.to_string();
		Ok(Self {
			io: tokio::sync::Mutex::new(Some(BufReader::new(stream))),
			peer,
		})
	}
}

struct Acceptor {
	listener: Mutex<Option<Arc<TcpListener>>>,
	cancel: CancellationToken,
	address: String,
}

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let original = ctx.original("socket")?;
	let errors = Errors::from_module(ctx, &original)?;
	ctx.define("error", errors.error.clone());
	ctx.define("timeout", errors.timeout.clone());

	let connection = Class::builder("Connection", ctx.module_name())
		.method("readline", Arity::range(1, 2), bind(&errors, readline))
		.method("read", Arity::exact(2), bind(&errors, read))
		.method("sendall", Arity::exact(2), bind(&errors, sendall))
		.method("close", Arity::exact(1), bind(&errors, close))
		.method("peer", Arity::exact(1), bind(&errors, peer))
		.build();
	let listener = Class::builder("Listener", ctx.module_name())
		.method("accept", Arity::exact(1), {
			let connection = connection.clone();
			bind(&errors, move |errors, args| accept(errors, args, connection.clone()))
		})
		.method("address", Arity::exact(1), bind(&errors, address))
		.method("close", Arity::exact(1), bind(&errors, close_listener))
		.build();

	ctx.define(
		"connect",
		Function::new(ctx.module_name(), "connect", Arity::range(1, 2), {
			let connection = connection.clone();
			bind(&errors, move |errors, args| connect(errors, args, connection.clone()))
		}),
	);
	ctx.define(
		"listen",
		Function::new(ctx.module_name(), "listen", Arity::exact(1), {
			let listener = listener.clone();
			bind(&errors, move |errors, args| listen(errors, args, listener.clone()))
		}),
	);
	ctx.define("Connection", connection);
	ctx.define("Listener", listener);
	Ok(())
}

async fn connect(errors: Errors, args: Args, connection: Class) -> CallResult {
	let addr = args.str(0)?.to_owned();
	let stream = match timeout_arg(&args, 1)? {
		Some(limit) => tokio::time::timeout(limit, TcpStream::connect(&addr))
			.await
			.map_err(|_| errors.timed_out())?,
		None => TcpStream::connect(&addr).await,
	}
	.map_err(|err| errors.io(err))?;
	let stream = Stream::new(stream).map_err(|err| errors.io(err))?;
	tracing::trace!(peer = %stream.peer, "green.socket.connect");
	Ok(wrap(&connection, stream))
}

async fn listen(errors: Errors, args: Args, listener: Class) -> CallResult {
	let bound = TcpListener::bind(args.str(0)?).await.map_err(|err| errors.io(err))?;
	let address = bound.local_addr().map_err(|err| errors.io(err))?.to_string();
	tracing::debug!(%address, "green.socket.listen");
	Ok(wrap(
		&listener,
		Acceptor {
			listener: Mutex::new(Some(Arc::new(bound))),
			cancel: CancellationToken::new(),
			address,
		},
	))
}

async fn accept(errors: Errors, args: Args, connection: Class) -> CallResult {
	let acceptor = args.receiver()?.opaque::<Acceptor>(HANDLE)?;
	let listener = acceptor.listener.lock().clone();
	let Some(listener) = listener else {
		return Err(cancelled());
	};
	let accepted = tokio::select! {
		() = acceptor.cancel.cancelled() => return Err(cancelled()),
		accepted = listener.accept() => accepted,
	};
	let (stream, _) = accepted.map_err(|err| errors.io(err))?;
	let stream = Stream::new(stream).map_err(|err| errors.io(err))?;
	Ok(wrap(&connection, stream))
}

fn cancelled() -> CallError {
	CallError::raise(exception::cancelled_error(), "listener closed")
}

async fn address(_: Errors, args: Args) -> CallResult {
	let acceptor = args.receiver()?.opaque::<Acceptor>(HANDLE)?;
	Ok(Value::from(acceptor.address.as_str()))
}

async fn close_listener(_: Errors, args: Args) -> CallResult {
	let acceptor = args.receiver()?.opaque::<Acceptor>(HANDLE)?;
	acceptor.cancel.cancel();
	acceptor.listener.lock().take();
	tracing::debug!(address = %acceptor.address, "green.socket.close");
	Ok(Value::None)
}

async fn readline(errors: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	let limit = line_limit(&args)?;
	let mut guard = stream.io.lock().await;
	let reader = guard.as_mut().ok_or_else(|| errors.closed())?;
	let mut line = Vec::new();
	reader
		.take(limit)
		.read_until(b'\n', &mut line)
		.await
		.map_err(|err| errors.io(err))?;
	Ok(Value::from(line))
}

async fn read(errors: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	let mut buf = vec![0; read_len(&args)?];
	let mut guard = stream.io.lock().await;
	let reader = guard.as_mut().ok_or_else(|| errors.closed())?;
	let n = reader.read(&mut buf).await.map_err(|err| errors.io(err))?;
	buf.truncate(n);
	Ok(Value::from(buf))
}

async fn sendall(errors: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	let data = args.bytes(1)?;
	let mut guard = stream.io.lock().await;
	let reader = guard.as_mut().ok_or_else(|| errors.closed())?;
	reader.get_mut().write_all(data).await.map_err(|err| errors.io(err))?;
	Ok(Value::None)
}

async fn close(_: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	if let Some(mut reader) = stream.io.lock().await.take() {
		let _ = reader.get_mut().shutdown().await;
	}
	Ok(Value::None)
}

async fn peer(_: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	Ok(Value::from(stream.peer.as_str()))
}
