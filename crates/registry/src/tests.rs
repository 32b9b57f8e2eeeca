use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use greenpatch_namespace::{Module, ModuleName, ModuleOrigin, NamespaceBuilder};

use crate::{Fingerprint, ModuleRegistry, RegistryError};

fn name(s: &str) -> ModuleName {
	ModuleName::parse(s).unwrap()
}

fn module(s: &str) -> Module {
	let mut ns = NamespaceBuilder::new();
	ns.bind("marker", s);
	ns.freeze(name(s), ModuleOrigin::Original)
}

fn fingerprint(adapter: &Module) -> Fingerprint {
	Fingerprint::of([("dep", adapter)])
}

/// Lookups on an empty registry report absence without side effects.
#[test]
fn empty_registry_lookups() {
	let registry = ModuleRegistry::new("test");
	let target = name("target");
	assert!(!registry.is_patched(&target));
	assert_eq!(
		registry.get(&target).unwrap_err(),
		RegistryError::NotPatched {
			registry: "test",
			identity: target.clone(),
		}
	);
	assert!(!registry.is_patched(&target));
	assert!(registry.is_empty());
}

/// Recording twice under the same fingerprint keeps the first namespace.
#[test]
fn record_same_fingerprint_is_noop() {
	let registry = ModuleRegistry::new("test");
	let target = name("target");
	let first = module("target");
	let second = module("target");

	let a = registry.record(&target, first.clone(), Fingerprint::EMPTY).unwrap();
	let b = registry.record(&target, second, Fingerprint::EMPTY).unwrap();
	assert!(Arc::ptr_eq(&a, &b));
	assert!(b.module().ptr_eq(&first));
	assert_eq!(registry.len(), 1);
}

/// A conflicting fingerprint is rejected every time, and the entry survives.
#[test]
fn record_conflicting_fingerprint_is_rejected() {
	let registry = ModuleRegistry::new("test");
	let target = name("target");
	let adapter_a = module("a");
	let adapter_b = module("b");
	registry.record(&target, module("target"), fingerprint(&adapter_a)).unwrap();

	for _ in 0..3 {
		let err = registry.record(&target, module("target"), fingerprint(&adapter_b)).unwrap_err();
		assert!(matches!(err, RegistryError::AlreadyPatched { .. }));
	}
	let entry = registry.get(&target).unwrap();
	assert_eq!(entry.fingerprint(), fingerprint(&adapter_a));
}

/// The guarded path builds once and serves the same entry afterwards.
#[test]
fn get_or_record_builds_once() {
	let registry = ModuleRegistry::new("test");
	let target = name("target");
	let builds = AtomicUsize::new(0);
	let build = || {
		builds.fetch_add(1, Ordering::SeqCst);
		Ok::<_, RegistryError>(module("target"))
	};

	let a = registry.get_or_record_with(&target, Fingerprint::EMPTY, build).unwrap();
	let b = registry.get_or_record_with(&target, Fingerprint::EMPTY, build).unwrap();
	assert!(a.module().ptr_eq(b.module()));
	assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[derive(Debug, thiserror::Error)]
enum BuildError {
	#[error("build failed")]
	Failed,
	#[error(transparent)]
	Registry(#[from] RegistryError),
}

/// A failed build publishes nothing and does not poison later attempts.
#[test]
fn failed_build_publishes_nothing() {
	let registry = ModuleRegistry::new("test");
	let target = name("target");

	let err = registry
		.get_or_record_with(&target, Fingerprint::EMPTY, || Err::<Module, _>(BuildError::Failed))
		.unwrap_err();
	assert!(matches!(err, BuildError::Failed));
	assert!(!registry.is_patched(&target));

	let entry = registry
		.get_or_record_with(&target, Fingerprint::EMPTY, || Ok::<_, BuildError>(module("target")))
		.unwrap();
	assert_eq!(entry.identity(), &target);
}

/// A build that re-enters its own identity is reported rather than deadlocking.
#[test]
fn reentrant_build_is_circular() {
	let registry = ModuleRegistry::new("test");
	let target = name("target");

	let err = registry
		.get_or_record_with(&target, Fingerprint::EMPTY, || {
			registry
				.get_or_record_with(&target, Fingerprint::EMPTY, || Ok::<_, BuildError>(module("target")))
				.map(|entry| entry.module().clone())
		})
		.unwrap_err();
	assert!(matches!(
		err,
		BuildError::Registry(RegistryError::CircularInjection { .. })
	));
	assert!(!registry.is_patched(&target));
}

/// Two threads each building one identity and then needing the other's: the
/// second to ask is refused instead of both blocking forever.
#[test]
fn crossed_builds_on_two_threads_are_circular() {
	let registry = ModuleRegistry::new("test");
	let barrier = Barrier::new(2);
	let crossed = |mine: &str, theirs: &str| {
		registry
			.get_or_record_with(&name(mine), Fingerprint::EMPTY, || {
				barrier.wait();
				registry.get_or_record_with(&name(theirs), Fingerprint::EMPTY, || {
					Ok::<_, RegistryError>(module(theirs))
				})?;
				Ok::<_, RegistryError>(module(mine))
			})
			.map(|_| ())
	};

	let results = std::thread::scope(|scope| {
		let ping = scope.spawn(|| crossed("ping", "pong"));
		let pong = scope.spawn(|| crossed("pong", "ping"));
		[ping.join().unwrap(), pong.join().unwrap()]
	});
	let refused = results
		.iter()
		.filter(|r| matches!(r, Err(RegistryError::CircularInjection { .. })))
		.count();
	assert_eq!(refused, 1, "{results:?}");
	assert!(results.iter().any(Result::is_ok));
	assert!(registry.is_patched(&name("ping")) || registry.is_patched(&name("pong")));
}

/// Building a different identity from inside a build is fine.
#[test]
fn nested_build_of_other_identity() {
	let registry = ModuleRegistry::new("test");
	let outer = name("outer");
	let inner = name("inner");

	registry
		.get_or_record_with(&outer, Fingerprint::EMPTY, || {
			registry.get_or_record_with(&inner, Fingerprint::EMPTY, || Ok::<_, RegistryError>(module("inner")))?;
			Ok::<_, RegistryError>(module("outer"))
		})
		.unwrap();
	assert!(registry.is_patched(&outer));
	assert!(registry.is_patched(&inner));
	let names: Vec<_> = registry.entries().iter().map(|e| e.identity().to_string()).collect();
	assert_eq!(names, vec!["inner", "outer"]);
}

/// Racing first use across worker threads: one build, one namespace.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_builds_once() {
	let registry = Arc::new(ModuleRegistry::new("test"));
	let builds = Arc::new(AtomicUsize::new(0));
	let target = name("target");

	let mut handles = Vec::new();
	for _ in 0..8 {
		let registry = Arc::clone(&registry);
		let builds = Arc::clone(&builds);
		let target = target.clone();
		handles.push(tokio::spawn(async move {
			registry
				.get_or_record_with(&target, Fingerprint::EMPTY, || {
					builds.fetch_add(1, Ordering::SeqCst);
					// Widen the race window; builds are synchronous by contract.
					std::thread::sleep(Duration::from_millis(20));
					Ok::<_, RegistryError>(module("target"))
				})
				.map(|entry| entry.module().clone())
		}));
	}

	let mut modules = Vec::new();
	for handle in handles {
		modules.push(handle.await.unwrap().unwrap());
	}
	assert_eq!(builds.load(Ordering::SeqCst), 1);
	assert!(modules.windows(2).all(|w| w[0].ptr_eq(&w[1])));
}
