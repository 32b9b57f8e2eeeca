//! Static file handler for `http_server`.
//!
//! Serves the files below a directory: the server's `directory` field when
//! set, otherwise the handler class's `directory` attribute. Request paths
//! are unquoted through this module's `url_fetch` binding when a request is
//! handled, never at import time.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use greenpatch_namespace::{Args, Arity, CallResult, Class, Function, Globals, Instance, Value};
use greenpatch_patcher::{ExecContext, ExecError};

use crate::bind;
use crate::http_server::{html_escape, http_date};

pub(crate) const SERVER_VERSION: &str = "SimpleHTTP/0.6";

const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

const EXTENSIONS: &[(&str, &str)] = &[
	("css", "text/css"),
	("gif", "image/gif"),
	("htm", "text/html"),
	("html", "text/html"),
	("ico", "image/x-icon"),
	("jpeg", "image/jpeg"),
	("jpg", "image/jpeg"),
	("js", "application/javascript"),
	("json", "application/json"),
	("pdf", "application/pdf"),
	("png", "image/png"),
	("svg", "image/svg+xml"),
	("txt", "text/plain"),
	("c", "text/plain"),
	("h", "text/plain"),
	("py", "text/plain"),
	("rs", "text/plain"),
	("xml", "text/xml"),
	("zip", "application/zip"),
];

/// Content type for `path`, by extension.
pub fn guess_type(path: &str) -> &'static str {
	let ext = Path::new(path)
		.extension()
		.and_then(|ext| ext.to_str())
		.map(str::to_ascii_lowercase);
	ext.and_then(|ext| EXTENSIONS.iter().find(|(known, _)| *known == ext))
		.map_or("application/octet-stream", |(_, ctype)| ctype)
}

/// Joins an already unquoted request path onto `root`.
///
/// `..` is resolved lexically and can never climb above `root`; `.` and
/// empty segments are dropped. A trailing slash in the request survives.
pub(crate) fn resolve_path(root: &str, unquoted: &str, trailing_slash: bool) -> String {
	let mut words: Vec<&str> = Vec::new();
	for word in unquoted.split('/') {
		match word {
			"" | "." => {}
			".." => {
				words.pop();
			}
			word => words.push(word),
		}
	}
	let mut path = PathBuf::from(root);
	for word in words {
		path.push(word);
	}
	let mut path = path.to_string_lossy().into_owned();
	if trailing_slash && !path.ends_with('/') {
		path.push('/');
	}
	path
}

/// Request path without its query and fragment.
fn strip_query(path: &str) -> &str {
	let path = path.split_once('?').map_or(path, |(path, _)| path);
	path.split_once('#').map_or(path, |(path, _)| path)
}

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let http_server = ctx.import("http_server")?;
	ctx.import("url_fetch")?;
	let base = ctx.attr_class(&http_server, "BaseHTTPRequestHandler")?;
	let globals = ctx.globals();

	ctx.define("__version__", "0.6");
	ctx.define(
		"guess_type",
		Function::new(ctx.module_name(), "guess_type", Arity::exact(1), |args| async move {
			Ok(Value::from(guess_type(args.str(0)?)))
		}),
	);

	let handler = Class::builder("SimpleHTTPRequestHandler", ctx.module_name())
		.base(base)
		.attr("server_version", SERVER_VERSION)
		.attr("directory", ".")
		.method("do_GET", Arity::exact(1), do_get)
		.method("do_HEAD", Arity::exact(1), do_head)
		.method("send_head", Arity::exact(1), send_head)
		.method("list_directory", Arity::exact(2), bind(&globals, list_directory))
		.method("translate_path", Arity::exact(2), bind(&globals, translate_path))
		.method("guess_type", Arity::exact(2), |args| async move {
			Ok(Value::from(guess_type(args.str(1)?)))
		})
		.build();
	ctx.define("SimpleHTTPRequestHandler", handler);
	Ok(())
}

/// Root directory for `handler`.
fn directory(handler: &Instance) -> CallResult<String> {
	let from_server = handler
		.field("server")
		.and_then(|server| server.as_instance().ok().and_then(|server| server.field("directory")));
	let directory = match from_server {
		Some(directory) => directory,
		None => handler.get("directory")?,
	};
	Ok(directory.as_str()?.to_owned())
}

async fn do_get(args: Args) -> CallResult {
	let this = args.receiver()?;
	let body = this.call_method("send_head", ()).await?;
	if !body.is_none() {
		this.call_method("write", [body]).await?;
	}
	Ok(Value::None)
}

async fn do_head(args: Args) -> CallResult {
	args.receiver()?.call_method("send_head", ()).await?;
	Ok(Value::None)
}

/// Sends status and headers; returns the body, or `None` once an error or
/// redirect has been written.
async fn send_head(args: Args) -> CallResult {
	let this = args.receiver()?;
	let request_path = this.get("path")?;
	let request_path = request_path.as_str()?.to_owned();
	let translated = this.call_method("translate_path", [Value::from(request_path.as_str())]).await?;
	let mut path = PathBuf::from(translated.as_str()?);

	if path.is_dir() {
		let (bare, query) = match request_path.split_once('?') {
			Some((bare, query)) => (bare, Some(query)),
			None => (request_path.as_str(), None),
		};
		if !bare.ends_with('/') {
			let location = match query {
				Some(query) => format!("{bare}/?{query}"),
				None => format!("{bare}/"),
			};
			this.call_method("send_response", [Value::Int(301)]).await?;
			this.call_method("send_header", [Value::from("Location"), Value::from(location)])
				.await?;
			this.call_method("end_headers", ()).await?;
			return Ok(Value::None);
		}
		match INDEX_FILES.iter().map(|index| path.join(index)).find(|index| index.is_file()) {
			Some(index) => path = index,
			None => {
				let listing = path.to_string_lossy().into_owned();
				return this.call_method("list_directory", [Value::from(listing)]).await;
			}
		}
	}

	let shown = path.to_string_lossy().into_owned();
	let ctype = this.call_method("guess_type", [Value::from(shown.as_str())]).await?;
	let (body, modified) = match std::fs::read(&path) {
		Ok(body) => (body, std::fs::metadata(&path).and_then(|m| m.modified()).ok()),
		Err(err) => {
			tracing::debug!(path = %shown, %err, "simple_http_server.open_failed");
			this.call_method("send_error", [Value::Int(404), Value::from("File not found")])
				.await?;
			return Ok(Value::None);
		}
	};

	this.call_method("send_response", [Value::Int(200)]).await?;
	this.call_method("send_header", [Value::from("Content-type"), ctype]).await?;
	this.call_method("send_header", [Value::from("Content-Length"), Value::from(body.len().to_string())])
		.await?;
	let modified = http_date(modified.unwrap_or_else(SystemTime::now));
	this.call_method("send_header", [Value::from("Last-Modified"), Value::from(modified)])
		.await?;
	this.call_method("end_headers", ()).await?;
	Ok(Value::from(body))
}

/// Writes an HTML index of the directory and returns it as the body.
async fn list_directory(globals: Globals, args: Args) -> CallResult {
	let this = args.receiver()?;
	let path = args.str(1)?;
	let mut entries: Vec<(String, bool, bool)> = match std::fs::read_dir(path) {
		Ok(entries) => entries
			.filter_map(Result::ok)
			.map(|entry| {
				let name = entry.file_name().to_string_lossy().into_owned();
				let kind = entry.file_type().ok();
				let is_dir = kind.is_some_and(|kind| kind.is_dir());
				let is_link = kind.is_some_and(|kind| kind.is_symlink());
				(name, is_dir, is_link)
			})
			.collect(),
		Err(_) => {
			this.call_method("send_error", [Value::Int(404), Value::from("No permission to list directory")])
				.await?;
			return Ok(Value::None);
		}
	};
	entries.sort_by_key(|(name, ..)| name.to_lowercase());

	let url_fetch = globals.import("url_fetch")?;
	let request_path = this.get("path")?;
	let shown = url_fetch.call("unquote", [request_path]).await?;
	let shown = html_escape(shown.as_str()?);

	let mut html = format!(
		"<!DOCTYPE html PUBLIC \"-//W3C//DTD HTML 3.2 Final//EN\"><html>\n\
		 <title>Directory listing for {shown}</title>\n\
		 <body>\n<h2>Directory listing for {shown}</h2>\n<hr>\n<ul>\n"
	);
	for (name, is_dir, is_link) in entries {
		let (display, link) = match (is_dir, is_link) {
			(true, _) => (format!("{name}/"), format!("{name}/")),
			(false, true) => (format!("{name}@"), name.clone()),
			(false, false) => (name.clone(), name.clone()),
		};
		let href = url_fetch.call("quote", [Value::from(link)]).await?;
		html.push_str(&format!(
			"<li><a href=\"{}\">{}</a>\n",
			html_escape(href.as_str()?),
			html_escape(&display)
		));
	}
	html.push_str("</ul>\n<hr>\n</body>\n</html>\n");

	this.call_method("send_response", [Value::Int(200)]).await?;
	this.call_method("send_header", [Value::from("Content-type"), Value::from("text/html; charset=utf-8")])
		.await?;
	this.call_method("send_header", [Value::from("Content-Length"), Value::from(html.len().to_string())])
		.await?;
	this.call_method("end_headers", ()).await?;
	Ok(Value::from(html.into_bytes()))
}

/// Maps a request path onto the filesystem below the handler's directory.
async fn translate_path(globals: Globals, args: Args) -> CallResult {
	let this = args.receiver()?;
	let path = strip_query(args.str(1)?);
	let trailing_slash = path.trim_end().ends_with('/');
	let unquoted = globals.import("url_fetch")?.call("unquote", [Value::from(path)]).await?;
	let root = directory(this)?;
	Ok(Value::from(resolve_path(&root, unquoted.as_str()?, trailing_slash)))
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("index.html", "text/html")]
	#[case("/a/b/STYLE.CSS", "text/css")]
	#[case("notes.txt", "text/plain")]
	#[case("photo.JPEG", "image/jpeg")]
	#[case("archive.tar.unknown", "application/octet-stream")]
	#[case("Makefile", "application/octet-stream")]
	#[case(".hidden", "application/octet-stream")]
	fn guesses_types_by_extension(#[case] path: &str, #[case] expected: &str) {
		assert_eq!(guess_type(path), expected);
	}

	#[rstest]
	#[case("/a/b.txt", false, "/srv/a/b.txt")]
	#[case("/a/./b/", true, "/srv/a/b/")]
	#[case("/../../etc/passwd", false, "/srv/etc/passwd")]
	#[case("/a/../b", false, "/srv/b")]
	#[case("/", true, "/srv/")]
	#[case("//x//y", false, "/srv/x/y")]
	fn resolves_below_root(#[case] unquoted: &str, #[case] trailing: bool, #[case] expected: &str) {
		assert_eq!(resolve_path("/srv", unquoted, trailing), expected);
	}

	#[test]
	fn strips_query_and_fragment() {
		assert_eq!(strip_query("/a?b=1#c"), "/a");
		assert_eq!(strip_query("/a#c?d"), "/a");
		assert_eq!(strip_query("/a"), "/a");
	}
}
