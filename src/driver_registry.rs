//! Generic name→factory registries for pluggable driver backends.
//!
//! Each driver family (rate-limit, inbound cache) owns one
//! [`DriverRegistry`] instance, constructed and populated at process start
//! and read-only afterwards. The registry knows nothing about the family's
//! semantics; it is purely a constructor lookup table, so backends are
//! swappable by configuration alone.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

/// Errors common to all driver backends.
///
/// Family traits report through this boxed type so drivers can surface
/// whatever their backing store produces; callers classify at the response
/// boundary (see [`crate::errors::RegistryV2Error::from_error`]).
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from driver instantiation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverRegistryError {
    /// No driver with the requested plugin type ID is registered.
    #[error("no {family} driver with ID {id:?}")]
    UnknownDriver { family: &'static str, id: String },
}

type Factory<D> = Box<dyn Fn() -> Box<D> + Send + Sync>;

/// A name→constructor table for one driver family.
///
/// Registration happens exactly once per plugin type ID at process start;
/// registering the same ID twice is a programming error and panics rather
/// than silently overwriting.
pub struct DriverRegistry<D: ?Sized> {
    family: &'static str,
    factories: RwLock<HashMap<String, Factory<D>>>,
}

impl<D: ?Sized> DriverRegistry<D> {
    /// Create an empty registry for the named driver family.
    ///
    /// The family name only appears in log lines and error messages.
    pub fn new(family: &'static str) -> Self {
        Self { family, factories: RwLock::new(HashMap::new()) }
    }

    /// Register a driver factory under its plugin type ID.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered. Registration only happens at
    /// process start, so this is a startup failure by construction.
    pub fn register(&self, id: &str, factory: impl Fn() -> Box<D> + Send + Sync + 'static) {
        let mut factories = self.factories.write().expect("driver registry poisoned");
        if factories.contains_key(id) {
            panic!("attempted to register multiple {} drivers with ID {:?}", self.family, id);
        }
        debug!(target: "gatehouse::driver_registry", family = self.family, id = %id, "driver registered");
        factories.insert(id.to_owned(), Box::new(factory));
    }

    /// Construct a fresh driver instance by plugin type ID.
    ///
    /// The caller must run the family's `init` on the instance before first
    /// use; an `init` failure is fatal to process startup.
    pub fn instantiate(&self, id: &str) -> Result<Box<D>, DriverRegistryError> {
        let factories = self.factories.read().expect("driver registry poisoned");
        match factories.get(id) {
            Some(factory) => Ok(factory()),
            None => Err(DriverRegistryError::UnknownDriver {
                family: self.family,
                id: id.to_owned(),
            }),
        }
    }

    /// Registered plugin type IDs, sorted.
    pub fn plugin_type_ids(&self) -> Vec<String> {
        let factories = self.factories.read().expect("driver registry poisoned");
        let mut ids: Vec<String> = factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<D: ?Sized> std::fmt::Debug for DriverRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("family", &self.family)
            .field("ids", &self.plugin_type_ids())
            .finish()
    }
}
