//! Namespace patcher.
//!
//! Runs a module's top-level code once against a fresh [`ExecContext`] and
//! freezes the result. Only reachable through the registry guard in
//! [`crate::Injector`]: running a body twice would duplicate its import-time
//! side effects.

use greenpatch_namespace::{Module, ModuleOrigin};

use crate::context::Executed;
use crate::{ExecContext, InjectError, Injector, ModuleDef, Substitutions, conformance};

/// Which registry the execution is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
	Original,
	Patched,
}

/// Builds the namespace for `def` under `substitutions`.
///
/// The namespace is frozen only after execution and conformance both
/// succeed, so a failure leaves nothing behind to publish.
pub(crate) fn execute(
	injector: &Injector,
	def: &ModuleDef,
	substitutions: &Substitutions,
	mode: Mode,
) -> Result<Module, InjectError> {
	let target = def.name();
	tracing::debug!(
		module = %target,
		mode = ?mode,
		substitutions = substitutions.len(),
		fingerprint = %substitutions.fingerprint(),
		"patch.execute"
	);

	let mut ctx = ExecContext::new(injector, target.clone(), mode, substitutions);
	def.run(&mut ctx).map_err(|err| err.into_inject(target))?;
	let Executed {
		namespace,
		imported,
		references,
	} = ctx.finish();

	conformance::check(injector, target, substitutions, &imported, &references, injector.options())?;

	let origin = match mode {
		Mode::Original => ModuleOrigin::Original,
		Mode::Patched => ModuleOrigin::Patched {
			substitutions: substitutions.describe(),
		},
	};
	Ok(namespace.freeze(target.clone(), origin))
}
