//! Caller identity as seen by admission control.
//!
//! Authentication happens elsewhere; the gateway only consumes the resolved
//! identity to decide rate-limit exemption.

/// Capability classification of the caller's identity.
///
/// Closed set; extend only by adding variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserType {
    /// An ordinary tenant user.
    Regular,
    /// An unauthenticated caller (some pull paths allow this).
    Anonymous,
    /// A cluster-internal peer registry.
    Peer,
    /// An automated trusted vulnerability scanner.
    TrustedScanner,
}

impl UserType {
    /// Whether traffic from this identity bypasses rate limits.
    ///
    /// Peer and scanner traffic is the downstream effect of an end-user
    /// request that was already rate-limited at its point of origin, so
    /// limiting it again would double-penalize the same logical action.
    pub fn is_rate_limit_exempt(self) -> bool {
        matches!(self, UserType::Peer | UserType::TrustedScanner)
    }
}

/// The resolved caller identity handed in by the authentication layer.
pub trait UserIdentity: Send + Sync {
    fn user_type(&self) -> UserType;

    /// Name for log lines; empty for anonymous callers.
    fn user_name(&self) -> &str;
}

/// Minimal identity value for embedding tests and non-HTTP callers.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    pub name: String,
    pub user_type: UserType,
}

impl StaticIdentity {
    pub fn new(name: impl Into<String>, user_type: UserType) -> Self {
        Self { name: name.into(), user_type }
    }
}

impl UserIdentity for StaticIdentity {
    fn user_type(&self) -> UserType {
        self.user_type
    }

    fn user_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_peer_and_scanner_are_exempt() {
        assert!(!UserType::Regular.is_rate_limit_exempt());
        assert!(!UserType::Anonymous.is_rate_limit_exempt());
        assert!(UserType::Peer.is_rate_limit_exempt());
        assert!(UserType::TrustedScanner.is_rate_limit_exempt());
    }
}
