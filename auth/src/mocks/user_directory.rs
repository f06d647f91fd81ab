//! Mock user directory for testing.

use crate::providers::{DirectoryError, UserDirectory};
use crate::state::{Entitlement, UserId, UserSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Accounts {
    users: HashMap<UserId, UserSnapshot>,
    passwords: HashMap<UserId, String>,
    entitlement_owners: HashMap<String, UserId>,
    unavailable: bool,
    lookups: usize,
}

/// Mock user directory.
///
/// Uses in-memory storage for testing. Passwords are compared in plain text.
#[derive(Debug, Clone, Default)]
pub struct MockUserDirectory {
    accounts: Arc<Mutex<Accounts>>,
}

impl MockUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a user with a password.
    pub fn insert_user(&self, user: UserSnapshot, password: &str) {
        if let Ok(mut accounts) = self.accounts.lock() {
            for entitlement in &user.entitlements {
                accounts
                    .entitlement_owners
                    .insert(entitlement.id.clone(), user.id);
            }
            accounts.passwords.insert(user.id, password.to_string());
            accounts.users.insert(user.id, user);
        }
    }

    /// Replace a user's snapshot, keeping the password.
    pub fn update_user(&self, user: UserSnapshot) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.users.insert(user.id, user);
        }
    }

    /// Remove a user.
    pub fn remove_user(&self, user_id: UserId) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.users.remove(&user_id);
            accounts.passwords.remove(&user_id);
            accounts.entitlement_owners.retain(|_, owner| *owner != user_id);
        }
    }

    /// Grant an entitlement to an existing user.
    pub fn grant_entitlement(&self, user_id: UserId, entitlement: Entitlement) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts
                .entitlement_owners
                .insert(entitlement.id.clone(), user_id);
            if let Some(user) = accounts.users.get_mut(&user_id) {
                user.entitlements.push(entitlement);
            }
        }
    }

    /// Simulate an outage: every call fails with [`DirectoryError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.unavailable = unavailable;
        }
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.accounts.lock().map_or(0, |accounts| accounts.lookups)
    }

    fn with_accounts<T>(
        &self,
        f: impl FnOnce(&Accounts) -> Result<T, DirectoryError>,
    ) -> Result<T, DirectoryError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| DirectoryError::Unavailable("Mutex lock failed".to_string()))?;
        accounts.lookups += 1;
        if accounts.unavailable {
            return Err(DirectoryError::Unavailable("directory offline".to_string()));
        }
        f(&accounts)
    }
}

impl UserDirectory for MockUserDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<UserSnapshot, DirectoryError> {
        self.with_accounts(|accounts| {
            accounts
                .users
                .get(&user_id)
                .cloned()
                .ok_or(DirectoryError::NotFound)
        })
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<UserSnapshot, DirectoryError> {
        self.with_accounts(|accounts| {
            accounts
                .users
                .values()
                .find(|user| user.email.eq_ignore_ascii_case(email))
                .filter(|user| accounts.passwords.get(&user.id).is_some_and(|p| p == password))
                .cloned()
                .ok_or(DirectoryError::InvalidCredentials)
        })
    }

    async fn owner_of_entitlement(&self, entitlement_id: &str) -> Result<UserId, DirectoryError> {
        self.with_accounts(|accounts| {
            accounts
                .entitlement_owners
                .get(entitlement_id)
                .copied()
                .ok_or(DirectoryError::NotFound)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::user_snapshot;
    use crate::state::Role;
    use chrono::Utc;

    #[tokio::test]
    async fn authenticate_checks_password() {
        let directory = MockUserDirectory::new();
        let user = user_snapshot("ada@example.com", Role::Member);
        directory.insert_user(user.clone(), "hunter2");

        assert_eq!(
            directory.authenticate("ADA@example.com", "hunter2").await.unwrap(),
            user
        );
        assert_eq!(
            directory.authenticate("ada@example.com", "wrong").await,
            Err(DirectoryError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn entitlements_resolve_to_owner() {
        let directory = MockUserDirectory::new();
        let user = user_snapshot("ada@example.com", Role::Member);
        directory.insert_user(user.clone(), "pw");
        directory.grant_entitlement(
            user.id,
            Entitlement {
                id: "ent-1".to_string(),
                kind: "subscription:pro".to_string(),
                granted_at: Utc::now(),
            },
        );

        assert_eq!(directory.owner_of_entitlement("ent-1").await, Ok(user.id));
        assert_eq!(
            directory.owner_of_entitlement("ent-2").await,
            Err(DirectoryError::NotFound)
        );
        assert!(directory.find_user(user.id).await.unwrap().has_entitlement("subscription:pro"));
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let directory = MockUserDirectory::new();
        directory.set_unavailable(true);
        assert!(matches!(
            directory.find_user(UserId::new()).await,
            Err(DirectoryError::Unavailable(_))
        ));
        assert_eq!(directory.lookups(), 1);
    }
}
