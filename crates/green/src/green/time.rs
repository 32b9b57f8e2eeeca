//! Cooperative clock: `sleep` suspends the task on the tokio timer.

use greenpatch_namespace::{Arity, Function, Value};
use greenpatch_patcher::{ExecContext, ExecError};

use crate::time::millis;

pub(crate) fn module(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let original = ctx.original("time")?;
	let monotonic = ctx.attr(&original, "monotonic_ms")?;
	ctx.define("monotonic_ms", monotonic);
	ctx.define(
		"sleep",
		Function::new(ctx.module_name(), "sleep", Arity::exact(1), |args| async move {
			tokio::time::sleep(millis(&args)?).await;
			Ok(Value::None)
		}),
	);
	Ok(())
}
