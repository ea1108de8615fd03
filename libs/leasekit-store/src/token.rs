//! Lock holder tokens
//!
//! A token proves ownership of a lease. It is generated fresh for every
//! acquisition attempt from the OS random source (UUID v4), so two
//! attempts never share one, even within the same process.

use std::fmt;

/// Opaque proof of lock ownership
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap a token obtained elsewhere (e.g. printed by the CLI)
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Only a prefix is logged; the full token is a capability.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "LockToken({}…)", prefix)
    }
}
