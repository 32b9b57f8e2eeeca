//! Declarative injection plans.
//!
//! A plan names targets and, for each, which dependencies to rebind to which
//! adapter modules. Adapters are catalog modules imported in their unpatched
//! form; the plan itself carries no code.
//!
//! ```toml
//! [options]
//! verify_shapes = true
//!
//! [[inject]]
//! target = "simple_http_server"
//! substitute = [
//!     { dependency = "http_server", adapter = "green.http_server" },
//!     { dependency = "url_fetch", adapter = "green.url_fetch" },
//! ]
//! ```

use std::path::{Path, PathBuf};

use greenpatch_namespace::{Module, ModuleName};
use serde::Deserialize;

use crate::{InjectError, Injector, PatchOptions, Substitutions};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
	#[error("failed to read plan {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid plan: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("failed to inject '{target}': {source}")]
	Inject {
		target: String,
		#[source]
		source: InjectError,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InjectionPlan {
	#[serde(default)]
	options: PatchOptions,
	#[serde(default, rename = "inject")]
	targets: Vec<TargetPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetPlan {
	pub target: String,
	#[serde(default)]
	pub substitute: Vec<SubstitutePlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubstitutePlan {
	pub dependency: String,
	pub adapter: String,
}

impl InjectionPlan {
	pub fn from_toml_str(input: &str) -> Result<Self, PlanError> {
		Ok(toml::from_str(input)?)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&input)
	}

	/// Options to build the [`Injector`] with.
	pub fn options(&self) -> &PatchOptions {
		&self.options
	}

	pub fn targets(&self) -> &[TargetPlan] {
		&self.targets
	}

	/// Injects every target in order, stopping at the first failure.
	///
	/// Targets injected before a failure stay patched.
	pub fn apply(&self, injector: &Injector) -> Result<Vec<Module>, PlanError> {
		let mut modules = Vec::with_capacity(self.targets.len());
		for plan in &self.targets {
			let fail = |source| PlanError::Inject {
				target: plan.target.clone(),
				source,
			};
			let substitutions = plan.substitutions(injector).map_err(fail)?;
			modules.push(injector.inject(&plan.target, substitutions).map_err(fail)?);
		}
		tracing::info!(targets = modules.len(), "plan.applied");
		Ok(modules)
	}
}

impl TargetPlan {
	fn substitutions(&self, injector: &Injector) -> Result<Substitutions, InjectError> {
		let mut substitutions = Substitutions::new();
		for entry in &self.substitute {
			let adapter = injector.original(&ModuleName::parse(&entry.adapter)?)?;
			substitutions.insert(&entry.dependency, adapter);
		}
		Ok(substitutions)
	}
}
