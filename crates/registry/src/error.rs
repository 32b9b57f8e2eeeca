use greenpatch_namespace::ModuleName;

use crate::Fingerprint;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	#[error("{registry}: '{identity}' has not been recorded")]
	NotPatched {
		registry: &'static str,
		identity: ModuleName,
	},

	/// Re-injection under a different mapping. Always rejected.
	#[error("{registry}: '{identity}' already recorded with fingerprint {existing}, refusing {requested}")]
	AlreadyPatched {
		registry: &'static str,
		identity: ModuleName,
		existing: Fingerprint,
		requested: Fingerprint,
	},

	/// A build of `identity` re-entered itself.
	#[error("{registry}: circular injection of '{identity}'")]
	CircularInjection {
		registry: &'static str,
		identity: ModuleName,
	},
}
