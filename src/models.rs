//! Shared records from the registry catalog.
//!
//! These types mirror rows owned by the external account/repository catalog.
//! The gateway only ever reads the identity fields; the scheduling watermarks
//! on [`Repository`] belong to the background jobs that maintain them.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Name of a tenant account, the unit of rate-limit and quota accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountName(String);

impl AccountName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountName {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for AccountName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// The subset of an account record that admission control needs.
///
/// The full account record (auth tenant, replication policy, and so on) lives
/// in the catalog; rate-limit drivers key their counters on the name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedAccount {
    pub name: AccountName,
}

impl ReducedAccount {
    pub fn new(name: impl Into<AccountName>) -> Self {
        Self { name: name.into() }
    }
}

/// A repository record, shared between the serving path and background jobs.
///
/// The three `next_*_at` watermarks are owned exclusively by the blob-mount
/// sweep, manifest sync, and garbage collection jobs. The gateway never reads
/// or writes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: i64,
    pub account_name: AccountName,
    pub name: String,
    pub next_blob_mount_sweep_at: Option<SystemTime>,
    pub next_manifest_sync_at: Option<SystemTime>,
    pub next_gc_at: Option<SystemTime>,
}

impl Repository {
    /// The account-qualified repository name, e.g. `tenant1/library/alpine`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.account_name, self.name)
    }
}

/// Identifies one manifest version at one upstream origin.
///
/// This is the inbound cache key: same origin, same repository, same tag or
/// digest means the same cached manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Hostname (and optional port) of the upstream registry.
    pub host: String,
    /// Repository path within the upstream registry.
    pub repo_name: String,
    /// Tag name or `sha256:...` digest string.
    pub reference: String,
}

impl ImageReference {
    pub fn new(
        host: impl Into<String>,
        repo_name: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self { host: host.into(), repo_name: repo_name.into(), reference: reference.into() }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // digests are joined with "@", tags with ":"
        let sep = if self.reference.contains(':') { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.host, self.repo_name, sep, self.reference)
    }
}
