//! Blocking clock facility.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use greenpatch_namespace::{Args, Arity, CallError, CallResult, Function, Value, exception};
use greenpatch_patcher::{ExecContext, ExecError};

/// Duration argument in milliseconds.
pub(crate) fn millis(args: &Args) -> CallResult<Duration> {
	let ms = u64::try_from(args.int(0)?)
		.map_err(|_| CallError::raise(exception::value_error(), "sleep length must be non-negative"))?;
	Ok(Duration::from_millis(ms))
}

/// Milliseconds since the first clock read in this process.
fn monotonic_ms() -> i64 {
	static EPOCH: OnceLock<Instant> = OnceLock::new();
	let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
	i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.define(
		"sleep",
		Function::new(ctx.module_name(), "sleep", Arity::exact(1), |args| async move {
			std::thread::sleep(millis(&args)?);
			Ok(Value::None)
		}),
	);
	ctx.define(
		"monotonic_ms",
		Function::new(ctx.module_name(), "monotonic_ms", Arity::exact(0), |_| async {
			Ok(Value::Int(monotonic_ms()))
		}),
	);
	Ok(())
}
