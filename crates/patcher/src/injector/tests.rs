use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use greenpatch_namespace::{Arity, CallError, Class, Function, ModuleOrigin, Name, Value, exception};

use super::*;
use crate::{ExecContext, ExecError, Incompatibility};

fn init() {
	let _ = tracing_subscriber::fmt::try_init();
}

fn name(s: &str) -> ModuleName {
	ModuleName::parse(s).unwrap()
}

fn constant(ctx: &ExecContext<'_>, fn_name: &str, value: i64) -> Function {
	Function::new(ctx.module_name(), fn_name, Arity::exact(0), move |_| async move { Ok(Value::Int(value)) })
}

fn clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let error = Class::builder("error", ctx.module_name())
		.base(exception::os_error().clone())
		.build();
	ctx.define("error", error);
	ctx.define("now", constant(ctx, "now", 1));
	ctx.define("later", constant(ctx, "later", 10));
	Ok(())
}

fn reexport_error(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let original = ctx.original("clock")?;
	let error = ctx.attr(&original, "error")?;
	ctx.define("error", error);
	Ok(())
}

/// Adapter that re-exports the original's exception class.
fn fast_clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	reexport_error(ctx)?;
	ctx.define("now", constant(ctx, "now", 2));
	ctx.define("later", constant(ctx, "later", 20));
	Ok(())
}

/// Second valid adapter, for conflicting mappings.
fn slow_clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	reexport_error(ctx)?;
	ctx.define("now", constant(ctx, "now", 3));
	ctx.define("later", constant(ctx, "later", 30));
	Ok(())
}

/// Binds `now` and `error` but not `later`.
fn partial_clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	reexport_error(ctx)?;
	ctx.define("now", constant(ctx, "now", 4));
	Ok(())
}

fn broken_clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	reexport_error(ctx)?;
	Ok(())
}

fn int_clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	reexport_error(ctx)?;
	ctx.define("now", 5i64);
	Ok(())
}

fn foreign_error_clock(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	let error = Class::builder("error", ctx.module_name())
		.base(exception::os_error().clone())
		.build();
	ctx.define("error", error);
	ctx.define("now", constant(ctx, "now", 6));
	Ok(())
}

/// Uses `now` and `error` at top level and `later` lazily.
fn app(counter: Arc<AtomicUsize>) -> impl Fn(&mut ExecContext<'_>) -> Result<(), ExecError> + Send + Sync + 'static {
	move |ctx| {
		counter.fetch_add(1, Ordering::SeqCst);
		ctx.import("clock")?;
		ctx.import_from("clock", &["now", "error"])?;

		let globals = ctx.globals();
		ctx.define(
			"tick",
			Function::new(ctx.module_name(), "tick", Arity::exact(0), move |_| {
				let globals = globals.clone();
				async move { globals.import("clock")?.call("later", ()).await }
			}),
		);
		ctx.define(
			"double",
			Function::new(ctx.module_name(), "double", Arity::exact(1), |args| async move {
				Ok(Value::Int(args.int(0)? * 2))
			}),
		);
		Ok(())
	}
}

fn bystander(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import_from("clock", &["now"])?;
	Ok(())
}

fn sneaky(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import("clock")?;
	ctx.original("clock")?;
	Ok(())
}

fn cyclic(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import("clock")?;
	let adapter = ctx.original("fast_clock")?;
	ctx.inject_into("cyclic", Substitutions::new().with("clock", adapter))?;
	Ok(())
}

fn failing(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import("clock")?;
	ctx.shared_class("Failure", |module| {
		Class::builder("Failure", module).base(exception::exception().clone()).build()
	})?;
	let local = Class::builder("Local", ctx.module_name()).build();
	ctx.define("Local", local);
	Ok(())
}

fn raises(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
	ctx.import("clock")?;
	Err(CallError::raise(exception::value_error(), "boom").into())
}

struct Fixture {
	injector: Injector,
	runs: Arc<AtomicUsize>,
}

impl Fixture {
	fn new() -> Self {
		Self::with_options(PatchOptions::default())
	}

	fn with_options(options: PatchOptions) -> Self {
		init();
		let runs = Arc::new(AtomicUsize::new(0));
		let catalog = ModuleCatalog::builder()
			.module("clock", clock)
			.module("fast_clock", fast_clock)
			.module("slow_clock", slow_clock)
			.module("partial_clock", partial_clock)
			.module("broken_clock", broken_clock)
			.module("int_clock", int_clock)
			.module("foreign_error_clock", foreign_error_clock)
			.module("app", app(runs.clone()))
			.module("bystander", bystander)
			.module("sneaky", sneaky)
			.module("cyclic", cyclic)
			.module("failing", failing)
			.module("raises", raises)
			.build()
			.unwrap();
		Self {
			injector: Injector::builder().catalog(catalog).options(options).build(),
			runs,
		}
	}

	fn adapter(&self, name: &str) -> Module {
		self.injector.original_named(name).unwrap()
	}

	fn with_clock(&self, adapter: &str) -> Substitutions {
		Substitutions::new().with("clock", self.adapter(adapter))
	}

	fn runs(&self) -> usize {
		self.runs.load(Ordering::SeqCst)
	}
}

#[test]
fn inject_is_idempotent() {
	let fx = Fixture::new();
	let first = fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();
	let second = fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();

	assert!(first.ptr_eq(&second));
	assert_eq!(fx.runs(), 1);
	assert!(first.is_patched());
	assert!(fx.injector.is_patched("app"));
	assert_eq!(fx.injector.patched_registry().len(), 1);
}

#[test]
fn patched_copy_is_separate_from_original() {
	let fx = Fixture::new();
	let original = fx.injector.original_named("app").unwrap();
	let patched = fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();

	assert!(!original.ptr_eq(&patched));
	assert!(!original.is_patched());
	assert_eq!(fx.runs(), 2);
	assert!(!fx.injector.is_patched("clock"));

	let clock = fx.adapter("clock");
	let fast = fx.adapter("fast_clock");
	assert_eq!(original.get("now"), clock.get("now"));
	assert_eq!(patched.get("now"), fast.get("now"));
	assert_ne!(patched.get("now"), clock.get("now"));
	assert_eq!(
		patched.origin(),
		&ModuleOrigin::Patched {
			substitutions: Arc::from(vec![(Name::from("clock"), name("fast_clock"))]),
		}
	);
}

#[test]
fn patching_leaves_unrelated_modules_alone() {
	let fx = Fixture::new();
	fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();

	let bystander = fx.injector.original_named("bystander").unwrap();
	assert_eq!(bystander.get("now"), fx.adapter("clock").get("now"));
	assert!(!fx.injector.is_patched("bystander"));
}

#[test]
fn conflicting_mapping_is_always_rejected() {
	let fx = Fixture::new();
	let first = fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();

	for _ in 0..2 {
		let err = fx.injector.inject("app", fx.with_clock("slow_clock")).unwrap_err();
		assert!(matches!(err, InjectError::AlreadyPatched { ref target, .. } if target.as_str() == "app"));
	}
	let again = fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();
	assert!(first.ptr_eq(&again));
	assert_eq!(fx.runs(), 1);
}

#[test]
fn missing_adapter_symbol_fails_and_publishes_nothing() {
	let fx = Fixture::new();
	let err = fx.injector.inject("app", fx.with_clock("broken_clock")).unwrap_err();
	match err {
		InjectError::IncompatibleAdapter {
			adapter,
			dependency,
			symbol,
			reason,
			..
		} => {
			assert_eq!(adapter.as_str(), "broken_clock");
			assert_eq!(&*dependency, "clock");
			assert_eq!(&*symbol, "now");
			assert_eq!(reason, Incompatibility::Missing);
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert!(!fx.injector.is_patched("app"));
	assert!(!fx.injector.original_registry().is_patched(&name("app")));

	// A later valid mapping still goes through.
	fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();
	assert!(fx.injector.is_patched("app"));
}

#[test]
fn shape_checks_compare_with_the_original() {
	let fx = Fixture::new();
	let err = fx.injector.inject("app", fx.with_clock("int_clock")).unwrap_err();
	assert!(matches!(
		err,
		InjectError::IncompatibleAdapter {
			reason: Incompatibility::Kind {
				expected: "function",
				found: "int"
			},
			..
		}
	));

	let err = fx.injector.inject("app", fx.with_clock("foreign_error_clock")).unwrap_err();
	assert!(matches!(
		err,
		InjectError::IncompatibleAdapter {
			reason: Incompatibility::ExceptionIdentity { .. },
			..
		}
	));
	assert!(!fx.injector.is_patched("app"));
}

#[test]
fn shape_checks_can_be_disabled() {
	let fx = Fixture::with_options(PatchOptions {
		verify_shapes: false,
		..PatchOptions::default()
	});
	let patched = fx.injector.inject("app", fx.with_clock("int_clock")).unwrap();
	assert_eq!(patched.get("now"), Some(&Value::Int(5)));
}

#[test]
fn substitution_must_be_imported() {
	let fx = Fixture::new();
	let subs = fx.with_clock("fast_clock").with("network", fx.adapter("fast_clock"));
	let err = fx.injector.inject("app", subs).unwrap_err();
	assert!(matches!(err, InjectError::UnboundSubstitution { ref dependency, .. } if &**dependency == "network"));

	let lenient = Fixture::with_options(PatchOptions {
		require_bound_substitutions: false,
		..PatchOptions::default()
	});
	let subs = lenient.with_clock("fast_clock").with("network", lenient.adapter("fast_clock"));
	assert!(lenient.injector.inject("app", subs).is_ok());
}

#[test]
fn bypassing_a_substitution_is_refused() {
	let fx = Fixture::new();
	let err = fx.injector.inject("sneaky", fx.with_clock("fast_clock")).unwrap_err();
	assert!(matches!(err, InjectError::BypassedSubstitution { ref dependency, .. } if &**dependency == "clock"));

	// Unpatched, the same code is fine.
	assert!(fx.injector.original_named("sneaky").is_ok());
}

#[test]
fn reentrant_injection_is_circular() {
	let fx = Fixture::new();
	let err = fx.injector.inject("cyclic", fx.with_clock("fast_clock")).unwrap_err();
	assert!(matches!(err, InjectError::CircularInjection { ref target } if target.as_str() == "cyclic"));
	assert!(!fx.injector.is_patched("cyclic"));
}

/// Body that rendezvouses with the other first executor, then imports `partner`.
fn mutual(
	partner: &'static str,
	rendezvous: Arc<(Barrier, AtomicUsize)>,
) -> impl Fn(&mut ExecContext<'_>) -> Result<(), ExecError> + Send + Sync + 'static {
	move |ctx| {
		let (barrier, arrivals) = &*rendezvous;
		if arrivals.fetch_add(1, Ordering::SeqCst) < 2 {
			barrier.wait();
		}
		ctx.import(partner)?;
		Ok(())
	}
}

#[test]
fn mutual_imports_on_two_threads_are_circular() {
	init();
	let rendezvous = Arc::new((Barrier::new(2), AtomicUsize::new(0)));
	let catalog = ModuleCatalog::builder()
		.module("ping", mutual("pong", rendezvous.clone()))
		.module("pong", mutual("ping", rendezvous))
		.build()
		.unwrap();
	let injector = Injector::new(catalog);

	let (tx, rx) = std::sync::mpsc::channel();
	for first in ["ping", "pong"] {
		let injector = injector.clone();
		let tx = tx.clone();
		std::thread::spawn(move || {
			let _ = tx.send(injector.original_named(first).map(|_| ()));
		});
	}
	for _ in 0..2 {
		let result = rx
			.recv_timeout(std::time::Duration::from_secs(10))
			.expect("both imports finish");
		assert!(
			matches!(result, Err(InjectError::CircularInjection { .. })),
			"{result:?}"
		);
	}
	assert!(injector.original_registry().is_empty());
}

#[test]
fn top_level_failure_is_reported() {
	let fx = Fixture::new();
	let err = fx.injector.inject("raises", fx.with_clock("fast_clock")).unwrap_err();
	match err {
		InjectError::Execution { module, source } => {
			assert_eq!(module.as_str(), "raises");
			assert!(source.is_instance_of(exception::value_error()));
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert!(!fx.injector.is_patched("raises"));
}

#[test]
fn shared_classes_keep_identity_across_copies() {
	let fx = Fixture::new();
	let patched = fx.injector.inject("failing", fx.with_clock("fast_clock")).unwrap();
	let original = fx.injector.original_named("failing").unwrap();

	assert_eq!(patched.get("Failure"), original.get("Failure"));
	assert_ne!(patched.get("Local"), original.get("Local"));
}

#[test]
fn unknown_targets_are_not_found() {
	let fx = Fixture::new();
	assert!(matches!(
		fx.injector.inject("nowhere", Substitutions::new()),
		Err(InjectError::ModuleNotFound { .. })
	));
	assert!(matches!(
		fx.injector.inject("a..b", Substitutions::new()),
		Err(InjectError::InvalidModuleName(_))
	));
	let subs = fx.with_clock("fast_clock").with("bad..dep", fx.adapter("fast_clock"));
	assert!(matches!(
		fx.injector.inject("app", subs),
		Err(InjectError::InvalidModuleName(_))
	));
	assert!(!fx.injector.is_patched("nowhere"));
}

#[test]
fn original_imports_are_cached() {
	let fx = Fixture::new();
	let a = fx.injector.original_named("app").unwrap();
	let b = fx.injector.original_named("app").unwrap();
	assert!(a.ptr_eq(&b));
	assert_eq!(fx.runs(), 1);
	assert!(fx.injector.original_registry().is_patched(&name("app")));
	assert!(!fx.injector.is_patched("app"));
}

#[tokio::test]
async fn patched_functions_resolve_lazily() {
	let fx = Fixture::new();
	let original = fx.injector.original_named("app").unwrap();
	let patched = fx.injector.inject("app", fx.with_clock("fast_clock")).unwrap();

	assert_eq!(original.call("tick", ()).await.unwrap(), Value::Int(10));
	assert_eq!(patched.call("tick", ()).await.unwrap(), Value::Int(20));

	for module in [&original, &patched] {
		assert_eq!(module.call("double", [Value::Int(21)]).await.unwrap(), Value::Int(42));
	}
}

#[tokio::test]
async fn late_missing_name_never_falls_back() {
	let fx = Fixture::new();
	let patched = fx.injector.inject("app", fx.with_clock("partial_clock")).unwrap();

	match patched.call("tick", ()).await {
		Err(CallError::LateBindingAttribute { module, name }) => {
			assert_eq!(module.as_str(), "partial_clock");
			assert_eq!(&*name, "later");
		}
		other => panic!("unexpected result: {other:?}"),
	}
}

#[test]
fn concurrent_first_use_executes_once() {
	let fx = Fixture::new();
	let subs = fx.with_clock("fast_clock");
	let barrier = Barrier::new(8);

	let modules: Vec<Module> = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..8)
			.map(|_| {
				scope.spawn(|| {
					barrier.wait();
					fx.injector.inject("app", subs.clone()).unwrap()
				})
			})
			.collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});

	assert_eq!(fx.runs(), 1);
	assert!(modules.iter().all(|m| m.ptr_eq(&modules[0])));
}

#[test]
fn adapter_order_does_not_change_identity() {
	let fx = Fixture::with_options(PatchOptions {
		require_bound_substitutions: false,
		..PatchOptions::default()
	});
	let fast = fx.adapter("fast_clock");
	let slow = fx.adapter("slow_clock");

	let a = fx
		.injector
		.inject("app", Substitutions::new().with("clock", fast.clone()).with("spare", slow.clone()))
		.unwrap();
	let b = fx
		.injector
		.inject("app", Substitutions::new().with("spare", slow).with("clock", fast))
		.unwrap();
	assert!(a.ptr_eq(&b));
	assert_eq!(fx.runs(), 1);
}
