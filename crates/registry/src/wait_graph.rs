//! Which thread is building which identity, and which identity each blocked
//! thread is waiting for.
//!
//! One graph is shared by every registry, so a cycle that runs through more
//! than one registry is still seen. Builds are synchronous, so a thread is
//! inside at most one chain of nested builds at a time.

use std::sync::LazyLock;
use std::thread::{self, ThreadId};

use greenpatch_namespace::ModuleName;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Registry id and identity.
pub(crate) type Key = (u64, ModuleName);

#[derive(Default)]
struct Graph {
	builders: FxHashMap<Key, ThreadId>,
	waiting: FxHashMap<ThreadId, Key>,
}

static GRAPH: LazyLock<Mutex<Graph>> = LazyLock::new(Mutex::default);

impl Graph {
	/// Whether `me` waiting for `key` would close a wait-for cycle.
	fn closes_cycle(&self, me: ThreadId, key: &Key) -> bool {
		let mut next = key;
		for _ in 0..=self.waiting.len() {
			let Some(&owner) = self.builders.get(next) else {
				return false;
			};
			if owner == me {
				return true;
			}
			let Some(wanted) = self.waiting.get(&owner) else {
				return false;
			};
			next = wanted;
		}
		false
	}
}

/// The current thread is about to block on the gate for `key`.
///
/// Returns `None`, recording nothing, when the thread building `key` is
/// itself (directly or through other builders) waiting on this thread.
pub(crate) fn wait(key: Key) -> Option<Waiting> {
	let me = thread::current().id();
	let mut graph = GRAPH.lock();
	if graph.closes_cycle(me, &key) {
		return None;
	}
	graph.waiting.insert(me, key.clone());
	Some(Waiting { me, key })
}

#[must_use]
pub(crate) struct Waiting {
	me: ThreadId,
	key: Key,
}

impl Waiting {
	/// The gate is held: this thread now builds `key`.
	pub(crate) fn acquired(self) -> Building {
		let key = self.key.clone();
		{
			let mut graph = GRAPH.lock();
			graph.waiting.remove(&self.me);
			graph.builders.insert(key.clone(), self.me);
		}
		Building { key }
	}
}

impl Drop for Waiting {
	fn drop(&mut self) {
		GRAPH.lock().waiting.remove(&self.me);
	}
}

/// Clears the builder record on every exit path, including unwinding.
pub(crate) struct Building {
	key: Key,
}

impl Drop for Building {
	fn drop(&mut self) {
		GRAPH.lock().builders.remove(&self.key);
	}
}
