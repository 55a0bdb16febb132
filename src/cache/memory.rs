//! In-memory inbound cache driver (plugin type ID `in-memory`).
//!
//! Entries live in a mutex-guarded map. The freshness check happens at read
//! time; expired entries are additionally swept out on each store so the map
//! does not grow without bound in a long-running process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::Deserialize;

use crate::cache::{CachedManifest, InboundCacheDriver, InboundCacheDriverRegistry};
use crate::driver_registry::DriverError;
use crate::models::ImageReference;

pub const PLUGIN_TYPE_ID: &str = "in-memory";

/// Maximum entry age when the configuration does not specify one.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(6 * 3600);

/// Register this driver in the given registry.
pub fn register(registry: &InboundCacheDriverRegistry) {
    registry.register(PLUGIN_TYPE_ID, || Box::new(InMemoryCacheDriver::new(DEFAULT_MAX_AGE)));
}

#[derive(Debug, Clone, Deserialize)]
struct Config {
    max_age_secs: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    contents: Vec<u8>,
    media_type: String,
    inserted_at: SystemTime,
}

/// See module docs.
#[derive(Debug)]
pub struct InMemoryCacheDriver {
    max_age: Duration,
    entries: Mutex<HashMap<ImageReference, Entry>>,
}

impl InMemoryCacheDriver {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age, entries: Mutex::new(HashMap::new()) }
    }

    fn is_fresh(&self, entry: &Entry, now: SystemTime) -> bool {
        // an inserted_at in the future (stored by a caller with a later
        // clock) is trivially fresh
        match now.duration_since(entry.inserted_at) {
            Ok(age) => age <= self.max_age,
            Err(_) => true,
        }
    }
}

#[async_trait::async_trait]
impl InboundCacheDriver for InMemoryCacheDriver {
    fn plugin_type_id(&self) -> &'static str {
        PLUGIN_TYPE_ID
    }

    async fn init(&mut self, config: &serde_json::Value) -> Result<(), DriverError> {
        if config.is_null() {
            return Ok(());
        }
        let config: Config = serde_json::from_value(config.clone())?;
        if config.max_age_secs == 0 {
            return Err("max_age_secs must be positive".into());
        }
        self.max_age = Duration::from_secs(config.max_age_secs);
        Ok(())
    }

    async fn load_manifest(
        &self,
        location: &ImageReference,
        now: SystemTime,
    ) -> Result<Option<CachedManifest>, DriverError> {
        let entries = self.entries.lock().expect("inbound cache state poisoned");
        match entries.get(location) {
            Some(entry) if self.is_fresh(entry, now) => Ok(Some(CachedManifest {
                contents: entry.contents.clone(),
                media_type: entry.media_type.clone(),
            })),
            _ => Ok(None),
        }
    }

    async fn store_manifest(
        &self,
        location: &ImageReference,
        contents: &[u8],
        media_type: &str,
        now: SystemTime,
    ) -> Result<(), DriverError> {
        let mut entries = self.entries.lock().expect("inbound cache state poisoned");

        // last-write-wins by timestamp: a slow fetch finishing after a newer
        // one for the same key must not clobber the fresher entry
        if let Some(existing) = entries.get(location) {
            if existing.inserted_at > now {
                return Ok(());
            }
        }
        entries.insert(
            location.clone(),
            Entry { contents: contents.to_vec(), media_type: media_type.to_owned(), inserted_at: now },
        );

        // physical eviction piggybacks on writes
        let max_age = self.max_age;
        entries.retain(|_, entry| match now.duration_since(entry.inserted_at) {
            Ok(age) => age <= max_age,
            Err(_) => true,
        });
        Ok(())
    }
}
