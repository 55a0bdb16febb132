//! The inbound cache: memoization of manifests fetched from upstream
//! registries.
//!
//! The cache is a passive, time-bounded store. On a pull-through miss the
//! caller performs the upstream fetch and then stores the result; the cache
//! itself never talks to an upstream. Freshness is a read-time property: an
//! entry older than the driver's max age reads as a miss whether or not the
//! driver has physically evicted it yet.

use std::time::SystemTime;

use crate::driver_registry::{DriverError, DriverRegistry};
use crate::models::ImageReference;

pub mod memory;

/// A manifest as stored by and returned from the inbound cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedManifest {
    pub contents: Vec<u8>,
    pub media_type: String,
}

/// A pluggable storage backend for the inbound cache.
///
/// Drivers must be safe for concurrent use and must order overwrites by the
/// `now` timestamp handed to `store_manifest`, not by call arrival: a slow
/// fetch that completes after a newer fetch for the same key must not regress
/// freshness.
#[async_trait::async_trait]
pub trait InboundCacheDriver: Send + Sync {
    /// The plugin type ID this driver registers under.
    fn plugin_type_id(&self) -> &'static str;

    /// One-time initialization with driver-specific configuration, called
    /// before first use. Failure here is fatal to process startup.
    async fn init(&mut self, config: &serde_json::Value) -> Result<(), DriverError>;

    /// Look up the manifest cached for `location`.
    ///
    /// `Ok(None)` is a genuine miss (absent or stale); a driver fault is an
    /// error and must never be masked as a miss.
    async fn load_manifest(
        &self,
        location: &ImageReference,
        now: SystemTime,
    ) -> Result<Option<CachedManifest>, DriverError>;

    /// Store a freshly fetched manifest for `location`, superseding any
    /// older entry for the same key.
    async fn store_manifest(
        &self,
        location: &ImageReference,
        contents: &[u8],
        media_type: &str,
        now: SystemTime,
    ) -> Result<(), DriverError>;
}

/// Registry for [`InboundCacheDriver`] backends.
pub type InboundCacheDriverRegistry = DriverRegistry<dyn InboundCacheDriver>;

/// Create the registry for inbound cache drivers, with the bundled in-memory
/// driver pre-registered.
pub fn driver_registry() -> InboundCacheDriverRegistry {
    let registry = DriverRegistry::new("inbound cache");
    memory::register(&registry);
    registry
}
