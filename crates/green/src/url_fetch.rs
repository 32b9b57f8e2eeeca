//! URL quoting and a minimal HTTP/1.0 client over the `socket` facility.

use greenpatch_namespace::{Args, Arity, CallError, CallResult, Class, Function, Globals, Value, exception};
use greenpatch_patcher::{ExecContext, ExecError};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::bind;

/// Escaped by [`quote`] unless listed as safe: everything outside the
/// unreserved set.
const QUOTED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'.').remove(b'-').remove(b'~');

/// Largest response body read by `urlopen`.
const MAX_RESPONSE: usize = 16 * 1024 * 1024;

/// Percent-encodes every byte outside the unreserved set and `safe`.
pub fn quote(s: &str, safe: &str) -> String {
	let mut out = String::with_capacity(s.len());
	let mut buf = [0; 4];
	for c in s.chars() {
		if c.is_ascii() && safe.contains(c) {
			out.push(c);
		} else {
			out.extend(utf8_percent_encode(c.encode_utf8(&mut buf), QUOTED));
		}
	}
	out
}

/// Decodes `%XX` escapes. Malformed escapes are kept as written; invalid
/// UTF-8 is replaced.
pub fn unquote(s: &str) -> String {
	percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// `scheme://netloc/path?query#fragment`, each part possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
	pub scheme: String,
	pub netloc: String,
	pub path: String,
	pub query: String,
	pub fragment: String,
}

pub fn urlsplit(url: &str) -> UrlParts {
	let mut parts = UrlParts::default();
	let mut rest = url;

	if let Some(colon) = rest.find(':') {
		let scheme = &rest[..colon];
		let valid = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
			&& scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
		if valid {
			parts.scheme = scheme.to_ascii_lowercase();
			rest = &rest[colon + 1..];
		}
	}
	if let Some(after) = rest.strip_prefix("//") {
		let end = after.find(['/', '?', '#']).unwrap_or(after.len());
		parts.netloc = after[..end].to_owned();
		rest = &after[end..];
	}
	if let Some(hash) = rest.find('#') {
		parts.fragment = rest[hash + 1..].to_owned();
		rest = &rest[..hash];
	}
	if let Some(question) = rest.find('?') {
		parts.query = rest[question + 1..].to_owned();
		rest = &rest[..question];
	}
	parts.path = rest.to_owned();
	parts
}

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import("socket")?;
	ctx.import_from("socket", &["error"])?;
	let url_error = ctx.shared_class("URLError", |module| {
		Class::builder("URLError", module).base(exception::os_error().clone()).build()
	})?;
	let globals = ctx.globals();

	ctx.define(
		"quote",
		Function::new(ctx.module_name(), "quote", Arity::range(1, 2), |args| async move {
			let safe = match args.opt(1) {
				Some(value) => value.as_str()?.to_owned(),
				None => "/".to_owned(),
			};
			Ok(Value::from(quote(args.str(0)?, &safe)))
		}),
	);
	ctx.define(
		"unquote",
		Function::new(ctx.module_name(), "unquote", Arity::exact(1), |args| async move {
			Ok(Value::from(unquote(args.str(0)?)))
		}),
	);
	ctx.define(
		"urlsplit",
		Function::new(ctx.module_name(), "urlsplit", Arity::exact(1), |args| async move {
			let parts = urlsplit(args.str(0)?);
			Ok(Value::from(vec![
				Value::from(parts.scheme),
				Value::from(parts.netloc),
				Value::from(parts.path),
				Value::from(parts.query),
				Value::from(parts.fragment),
			]))
		}),
	);
	ctx.define(
		"urlopen",
		Function::new(
			ctx.module_name(),
			"urlopen",
			Arity::range(1, 2),
			bind(&(url_error, globals), |(url_error, globals), args| {
				urlopen(url_error, globals, args)
			}),
		),
	);
	Ok(())
}

/// `GET url` over HTTP/1.0; returns the response body.
async fn urlopen(url_error: Class, globals: Globals, args: Args) -> CallResult {
	let url = args.str(0)?;
	let request = HttpRequest::parse(url).map_err(|reason| CallError::raise(&url_error, reason))?;

	let socket_error = globals.attr("error")?.as_class()?.clone();
	let wrap = |err: CallError| {
		if err.is_instance_of(&socket_error) {
			let reason = err.exception().map(|e| e.message().to_owned()).unwrap_or_default();
			CallError::raise(&url_error, reason)
		} else {
			err
		}
	};

	let socket = globals.import("socket")?;
	let timeout = args.opt(1).cloned().unwrap_or_default();
	let conn = socket
		.call("connect", [Value::from(request.address.as_str()), timeout])
		.await
		.map_err(wrap)?;
	let conn = conn.as_instance()?.clone();
	let request = format!(
		"GET {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
		request.target, request.host
	);
	tracing::debug!(%url, "url_fetch.urlopen");

	let mut response = Vec::new();
	let received: CallResult<()> = async {
		conn.call_method("sendall", [Value::from(request)]).await?;
		loop {
			let chunk = conn.call_method("read", [Value::from(crate::socket::MAX_READ)]).await?;
			let chunk = chunk.as_bytes()?;
			if chunk.is_empty() {
				break;
			}
			if response.len() + chunk.len() > MAX_RESPONSE {
				return Err(CallError::raise(&url_error, "response too large"));
			}
			response.extend_from_slice(chunk);
		}
		Ok(())
	}
	.await;
	conn.call_method("close", ()).await.map_err(wrap)?;
	received.map_err(wrap)?;

	let body = split_response(&response).ok_or_else(|| CallError::raise(&url_error, "malformed response"))?;
	Ok(Value::from(body))
}

/// Where `urlopen` connects and what it asks for.
#[derive(Debug, PartialEq, Eq)]
struct HttpRequest {
	/// `host:port` handed to `socket.connect`; IPv6 hosts keep their brackets.
	address: String,
	/// `Host` header value, with the port only when the URL names one.
	host: String,
	/// Path and query sent on the request line.
	target: String,
}

impl HttpRequest {
	fn parse(url: &str) -> Result<Self, String> {
		let parsed = Url::parse(url).map_err(|err| match err {
			url::ParseError::EmptyHost => "no host given".to_owned(),
			err => format!("invalid url {url:?}: {err}"),
		})?;
		if parsed.scheme() != "http" {
			return Err(format!("unknown url type: '{}'", parsed.scheme()));
		}
		let host = parsed.host_str().ok_or_else(|| "no host given".to_owned())?;
		let port = parsed.port_or_known_default().unwrap_or(80);
		let mut target = parsed.path().to_owned();
		if let Some(query) = parsed.query() {
			target.push('?');
			target.push_str(query);
		}
		Ok(Self {
			address: format!("{host}:{port}"),
			host: match parsed.port() {
				Some(port) => format!("{host}:{port}"),
				None => host.to_owned(),
			},
			target,
		})
	}
}

/// Body of a raw HTTP response, once the status line parses.
fn split_response(response: &[u8]) -> Option<&[u8]> {
	let end = response.windows(4).position(|w| w == b"\r\n\r\n")?;
	let head = std::str::from_utf8(&response[..end]).ok()?;
	let status = head.lines().next()?;
	let mut fields = status.split_whitespace();
	if !fields.next()?.starts_with("HTTP/") {
		return None;
	}
	fields.next()?.parse::<u16>().ok()?;
	Some(&response[end + 4..])
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("abc", "/", "abc")]
	#[case("a b", "/", "a%20b")]
	#[case("/dir/file name.txt", "/", "/dir/file%20name.txt")]
	#[case("/dir", "", "%2Fdir")]
	#[case("ü", "/", "%C3%BC")]
	#[case("a~b_c.d-e", "", "a~b_c.d-e")]
	fn quote_escapes_unsafe_bytes(#[case] input: &str, #[case] safe: &str, #[case] expected: &str) {
		assert_eq!(quote(input, safe), expected);
	}

	#[rstest]
	#[case("a%20b", "a b")]
	#[case("%2Fdir%2f", "/dir/")]
	#[case("%C3%BC", "ü")]
	#[case("100%", "100%")]
	#[case("%zz", "%zz")]
	#[case("%4", "%4")]
	fn unquote_decodes_escapes(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(unquote(input), expected);
	}

	#[test]
	fn urlsplit_separates_components() {
		assert_eq!(
			urlsplit("HTTP://example.com:8080/a/b?x=1#top"),
			UrlParts {
				scheme: "http".into(),
				netloc: "example.com:8080".into(),
				path: "/a/b".into(),
				query: "x=1".into(),
				fragment: "top".into(),
			}
		);
		assert_eq!(
			urlsplit("/just/a/path?q"),
			UrlParts {
				path: "/just/a/path".into(),
				query: "q".into(),
				..UrlParts::default()
			}
		);
	}

	#[rstest]
	#[case("http://example.com", "example.com:80", "example.com", "/")]
	#[case("http://example.com:8080/a/b?x=1#top", "example.com:8080", "example.com:8080", "/a/b?x=1")]
	#[case("http://[::1]/x", "[::1]:80", "[::1]", "/x")]
	#[case("http://[::1]:8000/", "[::1]:8000", "[::1]:8000", "/")]
	fn request_addresses_fill_in_the_port(
		#[case] url: &str,
		#[case] address: &str,
		#[case] host: &str,
		#[case] target: &str,
	) {
		assert_eq!(
			HttpRequest::parse(url),
			Ok(HttpRequest {
				address: address.into(),
				host: host.into(),
				target: target.into(),
			})
		);
	}

	#[rstest]
	#[case("ftp://example.com/", "unknown url type: 'ftp'")]
	#[case("http://", "no host given")]
	fn request_rejects_unusable_urls(#[case] url: &str, #[case] reason: &str) {
		assert_eq!(HttpRequest::parse(url), Err(reason.to_owned()));
	}

	#[test]
	fn split_response_requires_status_line() {
		assert_eq!(split_response(b"HTTP/1.0 200 OK\r\nA: b\r\n\r\nbody"), Some(&b"body"[..]));
		assert_eq!(split_response(b"garbage\r\n\r\nbody"), None);
		assert_eq!(split_response(b"HTTP/1.0 200 OK\r\n"), None);
	}
}
