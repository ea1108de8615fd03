//! Key naming
//!
//! All keys are optionally prefixed with a namespace so several
//! applications can share one store. Within a namespace each role has its
//! own prefix, so no caller-chosen key can name another role's key:
//!
//! - cache entries: `cache:{key}`
//! - population locks: `lock:{key}`
//! - rate limiter state: `rl:{kind}:{id}`

/// Key naming configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    namespace: Option<String>,
}

impl KeySpace {
    /// Keys used verbatim
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys prefixed with `{namespace}:`; an empty namespace means no prefix
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Full store key for a logical key
    pub fn key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    /// Store key holding the cached value for `cache_key`
    pub fn cache_key(&self, cache_key: &str) -> String {
        self.key(&format!("cache:{}", cache_key))
    }

    /// Lock resource key guarding population of `cache_key`
    pub fn lock_key(&self, cache_key: &str) -> String {
        self.key(&format!("lock:{}", cache_key))
    }

    /// Rate limiter state key
    pub fn limiter_key(&self, kind: &str, id: &str) -> String {
        self.key(&format!("rl:{}:{}", kind, id))
    }
}
