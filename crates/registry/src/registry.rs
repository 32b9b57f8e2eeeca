//! Module registry with atomic publication.
//!
//! # Role
//!
//! Tracks, per module identity, the one namespace that was built for it. Reads
//! go through an immutable snapshot that is swapped atomically; writes are
//! serialized per identity by a build gate so exactly one builder runs.
//!
//! # Invariants
//!
//! - At most one entry per identity; published entries are never replaced.
//! - A build runs at most once per identity unless it fails; losers of a race
//!   observe the winner's entry (see `tests::concurrent_first_use_builds_once`).
//! - Nothing is published for a failed build.
//! - Gates are only held across synchronous builds, never across a suspension.
//! - A thread never blocks on a gate whose builder is, directly or through
//!   other builders, waiting on that thread; the would-be waiter gets
//!   `CircularInjection` instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use greenpatch_namespace::{Module, ModuleName};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::wait_graph;
use crate::{Fingerprint, RegistryEntry, RegistryError};

type Snapshot = FxHashMap<ModuleName, Arc<RegistryEntry>>;

type Gate = Mutex<()>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Injectable registry of module namespaces keyed by [`ModuleName`].
pub struct ModuleRegistry {
	id: u64,
	label: &'static str,
	snap: ArcSwap<Snapshot>,
	gates: Mutex<FxHashMap<ModuleName, Arc<Gate>>>,
}

impl ModuleRegistry {
	/// Creates an empty registry. `label` appears in errors and traces.
	pub fn new(label: &'static str) -> Self {
		Self {
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
			label,
			snap: ArcSwap::from_pointee(Snapshot::default()),
			gates: Mutex::new(FxHashMap::default()),
		}
	}

	pub fn label(&self) -> &'static str {
		self.label
	}

	#[inline]
	pub fn is_patched(&self, identity: &ModuleName) -> bool {
		self.snap.load().contains_key(identity)
	}

	pub fn get(&self, identity: &ModuleName) -> Result<Arc<RegistryEntry>, RegistryError> {
		self.snap
			.load()
			.get(identity)
			.cloned()
			.ok_or_else(|| RegistryError::NotPatched {
				registry: self.label,
				identity: identity.clone(),
			})
	}

	/// Records a namespace built elsewhere.
	///
	/// A matching fingerprint for an existing entry is a no-op returning the
	/// existing entry; a different one fails with
	/// [`RegistryError::AlreadyPatched`].
	pub fn record(
		&self,
		identity: &ModuleName,
		module: Module,
		fingerprint: Fingerprint,
	) -> Result<Arc<RegistryEntry>, RegistryError> {
		self.publish(identity, module, fingerprint)
	}

	/// Returns the entry for `identity`, running `build` if there is none.
	///
	/// `build` runs under the identity's gate and must not suspend. It runs at
	/// most once across concurrent callers; a caller that loses the race
	/// waits for the gate and then observes the winner's entry.
	pub fn get_or_record_with<E, F>(
		&self,
		identity: &ModuleName,
		fingerprint: Fingerprint,
		build: F,
	) -> Result<Arc<RegistryEntry>, E>
	where
		F: FnOnce() -> Result<Module, E>,
		E: From<RegistryError>,
	{
		if let Some(entry) = self.lookup_matching(identity, fingerprint)? {
			tracing::trace!(registry = self.label, identity = %identity, "registry.hit");
			return Ok(entry);
		}

		let waiting = wait_graph::wait((self.id, identity.clone())).ok_or_else(|| {
			tracing::warn!(registry = self.label, identity = %identity, "registry.circular");
			RegistryError::CircularInjection {
				registry: self.label,
				identity: identity.clone(),
			}
		})?;
		let gate = self.gate(identity);
		let guard = gate.lock();
		let building = waiting.acquired();
		// Another builder may have published while we waited.
		if let Some(entry) = self.lookup_matching(identity, fingerprint)? {
			tracing::trace!(registry = self.label, identity = %identity, "registry.hit_after_wait");
			return Ok(entry);
		}

		let module = build()?;
		let entry = self.publish(identity, module, fingerprint)?;
		drop(building);
		drop(guard);
		self.gates.lock().remove(identity);
		Ok(entry)
	}

	/// All entries, sorted by identity.
	pub fn entries(&self) -> Vec<Arc<RegistryEntry>> {
		let snap = self.snap.load_full();
		let mut entries: Vec<_> = snap.values().cloned().collect();
		entries.sort_by(|a, b| a.identity().cmp(b.identity()));
		entries
	}

	pub fn len(&self) -> usize {
		self.snap.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lookup_matching(
		&self,
		identity: &ModuleName,
		fingerprint: Fingerprint,
	) -> Result<Option<Arc<RegistryEntry>>, RegistryError> {
		match self.snap.load().get(identity) {
			None => Ok(None),
			Some(entry) if entry.fingerprint() == fingerprint => Ok(Some(Arc::clone(entry))),
			Some(entry) => Err(self.conflict(entry, fingerprint)),
		}
	}

	fn conflict(&self, existing: &RegistryEntry, requested: Fingerprint) -> RegistryError {
		tracing::warn!(
			registry = self.label,
			identity = %existing.identity(),
			existing = %existing.fingerprint(),
			requested = %requested,
			"registry.conflict"
		);
		RegistryError::AlreadyPatched {
			registry: self.label,
			identity: existing.identity().clone(),
			existing: existing.fingerprint(),
			requested,
		}
	}

	fn gate(&self, identity: &ModuleName) -> Arc<Gate> {
		let mut gates = self.gates.lock();
		Arc::clone(gates.entry(identity.clone()).or_default())
	}

	fn publish(
		&self,
		identity: &ModuleName,
		module: Module,
		fingerprint: Fingerprint,
	) -> Result<Arc<RegistryEntry>, RegistryError> {
		let candidate = Arc::new(RegistryEntry::new(identity.clone(), module, fingerprint));
		let mut existing = None;
		self.snap.rcu(|current| {
			if let Some(entry) = current.get(identity) {
				existing = Some(Arc::clone(entry));
				return Arc::clone(current);
			}
			existing = None;
			let mut next = Snapshot::clone(current);
			next.insert(identity.clone(), Arc::clone(&candidate));
			Arc::new(next)
		});

		match existing {
			Some(entry) if entry.fingerprint() == fingerprint => Ok(entry),
			Some(entry) => Err(self.conflict(&entry, fingerprint)),
			None => {
				tracing::debug!(
					registry = self.label,
					identity = %identity,
					fingerprint = %fingerprint,
					module_id = candidate.module().id().get(),
					"registry.publish"
				);
				Ok(candidate)
			}
		}
	}
}

impl std::fmt::Debug for ModuleRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ModuleRegistry")
			.field("label", &self.label)
			.field("len", &self.len())
			.finish()
	}
}
