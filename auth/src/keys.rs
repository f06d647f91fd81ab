//! Key layout in the key-value store.
//!
//! ```text
//! [{namespace}:]session:{session_id}          -> encoded Session
//! [{namespace}:]session-invalid:{user_id}     -> encoded timestamp
//! [{namespace}:]session-stale:{user_id}       -> encoded timestamp
//! ```

use crate::state::{SessionId, UserId};

/// Builds the keys used by one session manager.
#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Key space with an optional namespace prefix.
    #[must_use]
    pub fn new(namespace: Option<&str>) -> Self {
        let prefix = namespace
            .filter(|ns| !ns.is_empty())
            .map(|ns| format!("{ns}:"))
            .unwrap_or_default();
        Self { prefix }
    }

    /// Key holding a session record.
    #[must_use]
    pub fn session(&self, id: &SessionId) -> String {
        format!("{}session:{id}", self.prefix)
    }

    /// Key holding a user's invalidation marker.
    #[must_use]
    pub fn invalidation(&self, user: &UserId) -> String {
        format!("{}session-invalid:{user}", self.prefix)
    }

    /// Key holding a user's staleness marker.
    #[must_use]
    pub fn staleness(&self, user: &UserId) -> String {
        format!("{}session-stale:{user}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_without_namespace() {
        let keys = KeySpace::new(None);
        let id = SessionId::generate();
        let user = UserId::new();
        assert_eq!(keys.session(&id), format!("session:{id}"));
        assert_eq!(keys.invalidation(&user), format!("session-invalid:{user}"));
        assert_eq!(keys.staleness(&user), format!("session-stale:{user}"));
    }

    #[test]
    fn namespace_prefixes_every_key() {
        let keys = KeySpace::new(Some("shop"));
        let user = UserId::new();
        assert!(keys.session(&SessionId::generate()).starts_with("shop:session:"));
        assert!(keys.invalidation(&user).starts_with("shop:session-invalid:"));
        assert!(keys.staleness(&user).starts_with("shop:session-stale:"));
    }

    #[test]
    fn empty_namespace_is_ignored() {
        let keys = KeySpace::new(Some(""));
        assert!(keys.session(&SessionId::generate()).starts_with("session:"));
    }

    #[test]
    fn session_and_marker_keys_never_collide() {
        let keys = KeySpace::new(None);
        let user = UserId::new();
        assert_ne!(keys.invalidation(&user), keys.staleness(&user));
    }
}
