//! At-most-once module registry.
//!
//! A [`ModuleRegistry`] owns the namespaces produced by executing modules and
//! guarantees that each identity is built and published exactly once per
//! registry. Registries are plain values: the injection facade holds one for
//! unpatched imports and one for patched targets, and tests build their own.

mod entry;
mod error;
mod fingerprint;
mod registry;
mod wait_graph;

pub use entry::RegistryEntry;
pub use error::RegistryError;
pub use fingerprint::Fingerprint;
pub use registry::ModuleRegistry;

#[cfg(test)]
mod tests;
