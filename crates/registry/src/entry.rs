use greenpatch_namespace::{Module, ModuleName};

use crate::Fingerprint;

/// A published module: identity, frozen namespace and the fingerprint it was
/// built under.
#[derive(Debug)]
pub struct RegistryEntry {
	identity: ModuleName,
	module: Module,
	fingerprint: Fingerprint,
}

impl RegistryEntry {
	pub(crate) fn new(identity: ModuleName, module: Module, fingerprint: Fingerprint) -> Self {
		Self {
			identity,
			module,
			fingerprint,
		}
	}

	pub fn identity(&self) -> &ModuleName {
		&self.identity
	}

	pub fn module(&self) -> &Module {
		&self.module
	}

	pub fn fingerprint(&self) -> Fingerprint {
		self.fingerprint
	}
}
