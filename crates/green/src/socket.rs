//! Blocking TCP sockets over `std::net`.
//!
//! Every operation blocks the calling thread until the kernel answers. The
//! cooperative copy lives in [`crate::green::socket`] and reuses this
//! module's exception classes.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use greenpatch_namespace::{
	Args, Arity, CallError, CallResult, Class, Function, Instance, Module, Opaque, Value, exception,
};
use greenpatch_patcher::{ExecContext, ExecError};
use parking_lot::Mutex;

use crate::bind;

/// Instance field holding the native handle.
pub(crate) const HANDLE: &str = "_handle";

/// Largest single `read(n)` honoured.
pub(crate) const MAX_READ: usize = 64 * 1024;

/// The module's exception classes, captured by native bodies.
#[derive(Debug, Clone)]
pub(crate) struct Errors {
	pub error: Class,
	pub timeout: Class,
}

impl Errors {
	/// Classes bound by an already executed `socket` module.
	pub fn from_module(ctx: &mut ExecContext<'_>, socket: &Module) -> Result<Self, ExecError> {
		Ok(Self {
			error: ctx.attr_class(socket, "error")?,
			timeout: ctx.attr_class(socket, "timeout")?,
		})
	}

	pub fn io(&self, err: io::Error) -> CallError {
		match err.kind() {
			io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CallError::raise(&self.timeout, "timed out"),
			_ => CallError::raise(&self.error, err.to_string()),
		}
	}

	pub fn closed(&self) -> CallError {
		CallError::raise(&self.error, "socket is closed")
	}

	pub fn timed_out(&self) -> CallError {
		CallError::raise(&self.timeout, "timed out")
	}
}

/// Optional millisecond timeout at `index`; `None` waits forever.
pub(crate) fn timeout_arg(args: &Args, index: usize) -> CallResult<Option<Duration>> {
	match args.opt(index) {
		None | Some(Value::None) => Ok(None),
		Some(value) => {
			let ms = value.as_int()?;
			let ms = u64::try_from(ms)
				.map_err(|_| CallError::raise(exception::value_error(), "timeout must be non-negative"))?;
			Ok(Some(Duration::from_millis(ms)))
		}
	}
}

/// `read(n)` length argument, clamped to [`MAX_READ`].
pub(crate) fn read_len(args: &Args) -> CallResult<usize> {
	let n = args.int(1)?;
	let n = usize::try_from(n).map_err(|_| CallError::raise(exception::value_error(), "negative read size"))?;
	Ok(n.min(MAX_READ))
}

/// Optional `readline(limit)` argument; unlimited when absent.
pub(crate) fn line_limit(args: &Args) -> CallResult<u64> {
	match args.opt(1) {
		None => Ok(u64::MAX),
		Some(limit) => u64::try_from(limit.as_int()?)
			.map_err(|_| CallError::raise(exception::value_error(), "negative line limit")),
	}
}

struct Stream {
	io: Mutex<Option<BufReader<TcpStream>>>,
	peer: String,
}

impl Stream {
	fn new(stream: TcpStream) -> io::Result<Self> {
		let peer = stream.peer_addr()?.to_string();
		Ok(Self {
			io: Mutex::new(Some(BufReader::new(stream))),
			peer,
		})
	}
}

struct Acceptor {
	listener: Mutex<Option<TcpListener>>,
	address: String,
}

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let error = ctx.shared_class("error", |module| {
		Class::builder("error", module).base(exception::os_error().clone()).build()
	})?;
	// A socket error that is also a builtin TimeoutError.
	let timeout = ctx.shared_class("timeout", |module| {
		Class::builder("timeout", module)
			.base(error.clone())
			.base(exception::timeout_error().clone())
			.build()
	})?;
	let errors = Errors { error, timeout };

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

/// Instance of `class` carrying `handle` as its native payload.
pub(crate) fn wrap(class: &Class, handle: impl std::any::Any + Send + Sync) -> Value {
	let instance = Instance::new(class.clone());
	instance.set(HANDLE, Opaque::new(handle));
	Value::Instance(instance)
}

async fn connect(errors: Errors, args: Args, connection: Class) -> CallResult {
	let addr = args.str(0)?;
	let stream = match timeout_arg(&args, 1)? {
		Some(timeout) => {
			let target = resolve(addr).map_err(|err| errors.io(err))?;
			TcpStream::connect_timeout(&target, timeout)
		}
		None => TcpStream::connect(addr),
	}
	.map_err(|err| errors.io(err))?;
	let stream = Stream::new(stream).map_err(|err| errors.io(err))?;
	tracing::trace!(peer = %stream.peer, "socket.connect");
	Ok(wrap(&connection, stream))
}

fn resolve(addr: &str) -> io::Result<std::net::SocketAddr> {
	use std::net::ToSocketAddrs;
	addr.to_socket_addrs()?
		.next()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("could not resolve {addr}")))
}

async fn listen(errors: Errors, args: Args, listener: Class) -> CallResult {
	let bound = TcpListener::bind(args.str(0)?).map_err(|err| errors.io(err))?;
	let address = bound.local_addr().map_err(|err| errors.io(err))?.to_string();
	tracing::debug!(%address, "socket.listen");
	Ok(wrap(
		&listener,
		Acceptor {
			listener: Mutex::new(Some(bound)),
			address,
		},
	))
}

async fn accept(errors: Errors, args: Args, connection: Class) -> CallResult {
	let acceptor = args.receiver()?.opaque::<Acceptor>(HANDLE)?;
	let listener = {
		let guard = acceptor.listener.lock();
		let listener = guard.as_ref().ok_or_else(|| errors.closed())?;
		listener.try_clone().map_err(|err| errors.io(err))?
	};
	let (stream, _) = listener.accept().map_err(|err| errors.io(err))?;
	let stream = Stream::new(stream).map_err(|err| errors.io(err))?;
	Ok(wrap(&connection, stream))
}

async fn address(_: Errors, args: Args) -> CallResult {
	let acceptor = args.receiver()?.opaque::<Acceptor>(HANDLE)?;
	Ok(Value::from(acceptor.address.as_str()))
}

async fn close_listener(_: Errors, args: Args) -> CallResult {
	let acceptor = args.receiver()?.opaque::<Acceptor>(HANDLE)?;
	acceptor.listener.lock().take();
	Ok(Value::None)
}

async fn readline(errors: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	let limit = line_limit(&args)?;
	let mut guard = stream.io.lock();
	let reader = guard.as_mut().ok_or_else(|| errors.closed())?;
	let mut line = Vec::new();
	reader
		.take(limit)
		.read_until(b'\n', &mut line)
		.map_err(|err| errors.io(err))?;
	Ok(Value::from(line))
}

async fn read(errors: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	let mut buf = vec![0; read_len(&args)?];
	let mut guard = stream.io.lock();
	let reader = guard.as_mut().ok_or_else(|| errors.closed())?;
	let n = reader.read(&mut buf).map_err(|err| errors.io(err))?;
	buf.truncate(n);
	Ok(Value::from(buf))
}

async fn sendall(errors: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	let data = args.bytes(1)?;
	let mut guard = stream.io.lock();
	let reader = guard.as_mut().ok_or_else(|| errors.closed())?;
	reader.get_mut().write_all(data).map_err(|err| errors.io(err))?;
	Ok(Value::None)
}

async fn close(_: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	if let Some(reader) = stream.io.lock().take() {
		let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
	}
	Ok(Value::None)
}

async fn peer(_: Errors, args: Args) -> CallResult {
	let stream = args.receiver()?.opaque::<Stream>(HANDLE)?;
	Ok(Value::from(stream.peer.as_str()))
}
