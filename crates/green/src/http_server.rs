//! HTTP/1.0 server classes over `socket_server`.
//!
//! # Role
//!
//! `HTTPServer` is a `TCPServer`; `BaseHTTPRequestHandler` is a
//! `StreamRequestHandler` that parses one request, then dispatches to the
//! `do_<METHOD>` method of the concrete handler class. Both base classes are
//! read from this module's `socket_server` binding at top level, so a copy
//! executed against a substitute server module inherits from the
//! substitute's classes.
//!
//! # Invariants
//!
//! - Request-line and header parsing never touch the socket beyond
//!   `rfile.readline()`.
//! - Every response written by `send_error` carries `Connection: close`.
//! - HTTP/0.9 requests get a body with no status line or headers.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use greenpatch_namespace::{Args, Arity, CallError, CallResult, Class, Instance, Value, exception};
use greenpatch_patcher::{ExecContext, ExecError};

use crate::bind;

/// Longest accepted request line, in bytes.
const MAX_REQUEST_LINE: usize = 65536;

/// Version string reported next to `server_version`.
pub(crate) const SYS_VERSION: &str = concat!("greenpatch/", env!("CARGO_PKG_VERSION"));

const DEFAULT_ERROR_MESSAGE: &str = "<head>
<title>Error response</title>
</head>
<body>
<h1>Error response</h1>
<p>Error code {code}.
<p>Message: {message}.
<p>Error code explanation: {code} = {explain}.
</body>
";

/// `(code, short message, long explanation)` for every status the server
/// knows how to describe.
pub(crate) const RESPONSES: &[(i64, &str, &str)] = &[
	(100, "Continue", "Request received, please continue"),
	(101, "Switching Protocols", "Switching to new protocol; obey Upgrade header"),
	(200, "OK", "Request fulfilled, document follows"),
	(201, "Created", "Document created, URL follows"),
	(202, "Accepted", "Request accepted, processing continues off-line"),
	(203, "Non-Authoritative Information", "Request fulfilled from cache"),
	(204, "No Content", "Request fulfilled, nothing follows"),
	(205, "Reset Content", "Clear input form for further input."),
	(206, "Partial Content", "Partial content follows."),
	(300, "Multiple Choices", "Object has several resources -- see URI list"),
	(301, "Moved Permanently", "Object moved permanently -- see URI list"),
	(302, "Found", "Object moved temporarily -- see URI list"),
	(303, "See Other", "Object moved -- see Method and URL list"),
	(304, "Not Modified", "Document has not changed since given time"),
	(305, "Use Proxy", "You must use proxy specified in Location to access this resource."),
	(307, "Temporary Redirect", "Object moved temporarily -- see URI list"),
	(400, "Bad Request", "Bad request syntax or unsupported method"),
	(401, "Unauthorized", "No permission -- see authorization schemes"),
	(402, "Payment Required", "No payment -- see charging schemes"),
	(403, "Forbidden", "Request forbidden -- authorization will not help"),
	(404, "Not Found", "Nothing matches the given URI"),
	(405, "Method Not Allowed", "Specified method is invalid for this resource."),
	(406, "Not Acceptable", "URI not available in preferred format."),
	(407, "Proxy Authentication Required", "You must authenticate with this proxy before proceeding."),
	(408, "Request Timeout", "Request timed out; try again later."),
	(409, "Conflict", "Request conflict."),
	(410, "Gone", "URI no longer exists and has been permanently removed."),
	(411, "Length Required", "Client must specify Content-Length."),
	(412, "Precondition Failed", "Precondition in headers is false."),
	(413, "Request Entity Too Large", "Entity is too large."),
	(414, "Request-URI Too Long", "URI is too long."),
	(415, "Unsupported Media Type", "Entity body in unsupported format."),
	(416, "Requested Range Not Satisfiable", "Cannot satisfy request range."),
	(417, "Expectation Failed", "Expect condition could not be satisfied."),
	(500, "Internal Server Error", "Server got itself in trouble"),
	(501, "Not Implemented", "Server does not support this operation"),
	(502, "Bad Gateway", "Invalid responses from another server/proxy."),
	(503, "Service Unavailable", "The server cannot process the request due to a high load"),
	(504, "Gateway Timeout", "The gateway server did not receive a timely response"),
	(505, "HTTP Version Not Supported", "Cannot fulfill request."),
];

pub(crate) fn reason(code: i64) -> Option<(&'static str, &'static str)> {
	RESPONSES
		.iter()
		.find(|(known, ..)| *known == code)
		.map(|(_, short, long)| (*short, *long))
}

/// The parts of a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestLine {
	pub command: String,
	pub path: String,
	pub version: String,
}

/// Parses `METHOD PATH [VERSION]`; errors carry the status to reply with.
pub(crate) fn parse_request_line(line: &str) -> Result<RequestLine, (i64, String)> {
	let line = line.trim_end_matches(['\r', '\n']);
	let words: Vec<&str> = line.split_whitespace().collect();
	match words.as_slice() {
		[command, path, version] => {
			let Some(number) = version.strip_prefix("HTTP/") else {
				return Err((400, format!("Bad request version ({version:?})")));
			};
			let Some((major, minor)) = number.split_once('.') else {
				return Err((400, format!("Bad request version ({version:?})")));
			};
			let (Ok(major), Ok(_)) = (major.parse::<u32>(), minor.parse::<u32>()) else {
				return Err((400, format!("Bad request version ({version:?})")));
			};
			if major >= 2 {
				return Err((505, format!("Invalid HTTP Version ({number})")));
			}
			Ok(RequestLine {
				command: (*command).to_owned(),
				path: (*path).to_owned(),
				version: (*version).to_owned(),
			})
		}
		[command, path] if *command == "GET" => Ok(RequestLine {
			command: (*command).to_owned(),
			path: (*path).to_owned(),
			version: "HTTP/0.9".to_owned(),
		}),
		[command, _] => Err((400, format!("Bad HTTP/0.9 request type ({command:?})"))),
		_ => Err((400, format!("Bad request syntax ({line:?})"))),
	}
}

/// RFC 1123 date, as sent in the `Date` header.
pub(crate) fn http_date(time: SystemTime) -> String {
	DateTime::<Utc>::from(time).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn html_escape(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			c => out.push(c),
		}
	}
	out
}

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let socket_server = ctx.import("socket_server")?;
	let tcp_server = ctx.attr_class(&socket_server, "TCPServer")?;
	let stream_handler = ctx.attr_class(&socket_server, "StreamRequestHandler")?;

	let http_server = Class::builder("HTTPServer", ctx.module_name())
		.base(tcp_server.clone())
		.attr("allow_reuse_address", true)
		.method("__init__", Arity::exact(3), bind(&tcp_server, http_server_init))
		.build();

	let responses: Vec<Value> = RESPONSES
		.iter()
		.map(|(code, short, long)| Value::from(vec![Value::Int(*code), Value::from(*short), Value::from(*long)]))
		.collect();

	let handler = Class::builder("BaseHTTPRequestHandler", ctx.module_name())
		.base(stream_handler)
		.attr("server_version", "BaseHTTP/0.3")
		.attr("sys_version", SYS_VERSION)
		.attr("protocol_version", "HTTP/1.0")
		.attr("default_request_version", "HTTP/0.9")
		.attr("error_message_format", DEFAULT_ERROR_MESSAGE)
		.method("handle", Arity::exact(1), handle)
		.method("handle_one_request", Arity::exact(1), handle_one_request)
		.method("parse_request", Arity::exact(1), parse_request)
		.method("header", Arity::exact(2), header)
		.method("send_error", Arity::range(2, 3), send_error)
		.method("send_response", Arity::range(2, 3), send_response)
		.method("send_header", Arity::exact(3), send_header)
		.method("end_headers", Arity::exact(1), end_headers)
		.method("write", Arity::exact(2), write)
		.method("log_request", Arity::exact(2), log_request)
		.method("log_message", Arity::exact(2), log_message)
		.method("version_string", Arity::exact(1), version_string)
		.method("date_time_string", Arity::exact(1), |_| async {
			Ok(Value::from(http_date(SystemTime::now())))
		})
		.method("address_string", Arity::exact(1), |args| async move {
			args.receiver()?.get("client_address")
		})
		.build();

	ctx.define("DEFAULT_ERROR_MESSAGE", DEFAULT_ERROR_MESSAGE);
	ctx.define("responses", responses);
	ctx.define("HTTPServer", http_server);
	ctx.define("BaseHTTPRequestHandler", handler);
	Ok(())
}

async fn http_server_init(tcp_server: Class, args: Args) -> CallResult {
	tcp_server.method("__init__")?.call(args.clone()).await?;
	let this = args.receiver()?;
	let address = this.get("server_address")?;
	let (host, port) = split_host_port(address.as_str()?)?;
	this.set("server_name", host);
	this.set("server_port", port);
	Ok(Value::None)
}

fn split_host_port(address: &str) -> CallResult<(&str, i64)> {
	address
		.rsplit_once(':')
		.and_then(|(host, port)| Some((host, port.parse::<i64>().ok()?)))
		.ok_or_else(|| CallError::raise(exception::value_error(), format!("bad server address {address:?}")))
}

fn is_http09(this: &Instance) -> bool {
	this.get("request_version")
		.is_ok_and(|v| v.as_str().is_ok_and(|v| v == "HTTP/0.9"))
}

async fn handle(args: Args) -> CallResult {
	let this = args.receiver()?;
	this.set("close_connection", true);
	this.call_method("handle_one_request", ()).await?;
	while !this.get("close_connection")?.truthy() {
		this.call_method("handle_one_request", ()).await?;
	}
	Ok(Value::None)
}

async fn handle_one_request(args: Args) -> CallResult {
	let this = args.receiver()?;
	let raw = this
		.get("rfile")?
		.as_instance()?
		.call_method("readline", [Value::from(MAX_REQUEST_LINE + 1)])
		.await?;
	let raw = raw.as_bytes()?;
	if raw.is_empty() {
		this.set("close_connection", true);
		return Ok(Value::None);
	}
	if raw.len() > MAX_REQUEST_LINE {
		this.set("requestline", "");
		this.set("request_version", "");
		this.set("command", "");
		this.call_method("send_error", [Value::Int(414)]).await?;
		return Ok(Value::None);
	}
	this.set("raw_requestline", raw);
	if !this.call_method("parse_request", ()).await?.truthy() {
		return Ok(Value::None);
	}

	let command = this.get("command")?;
	let method = format!("do_{}", command.as_str()?);
	if !this.has(&method) {
		let message = format!("Unsupported method ({:?})", command.as_str()?);
		this.call_method("send_error", [Value::Int(501), Value::from(message)])
			.await?;
		return Ok(Value::None);
	}
	this.call_method(&method, ()).await?;
	Ok(Value::None)
}

/// Parses the request line and headers; answers and returns false on error.
async fn parse_request(args: Args) -> CallResult {
	let this = args.receiver()?;
	let default_version = this.get("default_request_version")?;
	this.set("command", Value::None);
	this.set("request_version", default_version);
	this.set("close_connection", true);

	let raw = this.get("raw_requestline")?;
	let line = String::from_utf8_lossy(raw.as_bytes()?).into_owned();
	let requestline = line.trim_end_matches(['\r', '\n']).to_owned();
	this.set("requestline", requestline.as_str());

	let parsed = match parse_request_line(&line) {
		Ok(parsed) => parsed,
		Err((code, message)) => {
			this.call_method("send_error", [Value::Int(code), Value::from(message)])
				.await?;
			return Ok(Value::from(false));
		}
	};
	this.set("command", parsed.command.as_str());
	this.set("path", parsed.path.as_str());
	this.set("request_version", parsed.version.as_str());
	if parsed.version == "HTTP/0.9" {
		this.set("headers", Vec::<Value>::new());
		return Ok(Value::from(true));
	}

	let rfile = this.get("rfile")?;
	let rfile = rfile.as_instance()?;
	let mut headers = Vec::new();
	loop {
		let line = rfile.call_method("readline", ()).await?;
		let line = String::from_utf8_lossy(line.as_bytes()?).into_owned();
		let line = line.trim_end_matches(['\r', '\n']);
		if line.is_empty() {
			break;
		}
		if let Some((name, value)) = line.split_once(':') {
			headers.push(Value::from(vec![Value::from(name.trim()), Value::from(value.trim())]));
		}
	}
	this.set("headers", headers);

	let modern = this.get("protocol_version")?.as_str()? >= "HTTP/1.1";
	let mut close = !(modern && parsed.version.as_str() >= "HTTP/1.1");
	let connection = this.call_method("header", [Value::from("Connection")]).await?;
	if let Ok(connection) = connection.as_str() {
		if connection.eq_ignore_ascii_case("close") {
			close = true;
		} else if connection.eq_ignore_ascii_case("keep-alive") && modern {
			close = false;
		}
	}
	this.set("close_connection", close);
	Ok(Value::from(true))
}

/// First header named `name`, case-insensitively, or `None`.
async fn header(args: Args) -> CallResult {
	let this = args.receiver()?;
	let wanted = args.str(1)?;
	let headers = this.get("headers")?;
	for pair in headers.as_list()? {
		let pair = pair.as_list()?;
		if let [name, value] = pair {
			if name.as_str()?.eq_ignore_ascii_case(wanted) {
				return Ok(value.clone());
			}
		}
	}
	Ok(Value::None)
}

async fn send_error(args: Args) -> CallResult {
	let this = args.receiver()?;
	let code = args.int(1)?;
	let (short, long) = reason(code).unwrap_or(("???", "???"));
	let message = match args.opt(2) {
		Some(Value::None) | None => short.to_owned(),
		Some(message) => message.as_str()?.to_owned(),
	};
	this.call_method("log_message", [Value::from(format!("code {code}, message {message}"))])
		.await?;

	let template = this.get("error_message_format")?;
	let body = template
		.as_str()?
		.replace("{code}", &code.to_string())
		.replace("{message}", &html_escape(&message))
		.replace("{explain}", long);

	this.call_method("send_response", [Value::Int(code), Value::from(message)])
		.await?;
	this.call_method("send_header", [Value::from("Content-Type"), Value::from("text/html")])
		.await?;
	this.call_method("send_header", [Value::from("Connection"), Value::from("close")])
		.await?;
	this.call_method("end_headers", ()).await?;

	let head = this.get("command").is_ok_and(|c| c.as_str().is_ok_and(|c| c == "HEAD"));
	if !head && code >= 200 && code != 204 && code != 304 {
		this.call_method("write", [Value::from(body)]).await?;
	}
	Ok(Value::None)
}

async fn send_response(args: Args) -> CallResult {
	let this = args.receiver()?;
	let code = args.int(1)?;
	this.call_method("log_request", [Value::Int(code)]).await?;
	if !is_http09(this) {
		let message = match args.opt(2) {
			Some(Value::None) | None => reason(code).map_or("", |(short, _)| short).to_owned(),
			Some(message) => message.as_str()?.to_owned(),
		};
		let protocol = this.get("protocol_version")?;
		let status = format!("{} {code} {message}\r\n", protocol.as_str()?);
		this.call_method("write", [Value::from(status)]).await?;
	}
	let server = this.call_method("version_string", ()).await?;
	this.call_method("send_header", [Value::from("Server"), server]).await?;
	let date = this.call_method("date_time_string", ()).await?;
	this.call_method("send_header", [Value::from("Date"), date]).await?;
	Ok(Value::None)
}

async fn send_header(args: Args) -> CallResult {
	let this = args.receiver()?;
	let key = args.str(1)?;
	let value = args.str(2)?;
	if !is_http09(this) {
		this.call_method("write", [Value::from(format!("{key}: {value}\r\n"))])
			.await?;
	}
	if key.eq_ignore_ascii_case("connection") {
		if value.eq_ignore_ascii_case("close") {
			this.set("close_connection", true);
		} else if value.eq_ignore_ascii_case("keep-alive") {
			this.set("close_connection", false);
		}
	}
	Ok(Value::None)
}

async fn end_headers(args: Args) -> CallResult {
	let this = args.receiver()?;
	if !is_http09(this) {
		this.call_method("write", [Value::from("\r\n")]).await?;
	}
	Ok(Value::None)
}

async fn write(args: Args) -> CallResult {
	let this = args.receiver()?;
	let wfile = this.get("wfile")?;
	wfile.as_instance()?.call_method("sendall", [args.get(1)?.clone()]).await
}

async fn log_request(args: Args) -> CallResult {
	let this = args.receiver()?;
	let line = this.get("requestline").ok().unwrap_or_default();
	let message = format!("\"{}\" {}", line.as_str().unwrap_or(""), args.int(1)?);
	this.call_method("log_message", [Value::from(message)]).await
}

async fn log_message(args: Args) -> CallResult {
	let this = args.receiver()?;
	let client = this.call_method("address_string", ()).await?;
	tracing::info!(client = ?client, "{}", args.str(1)?);
	Ok(Value::None)
}

async fn version_string(args: Args) -> CallResult {
	let this = args.receiver()?;
	let server = this.get("server_version")?;
	let sys = this.get("sys_version")?;
	Ok(Value::from(format!("{} {}", server.as_str()?, sys.as_str()?)))
}
