//! Application state for Axum handlers.

use crate::cookie::CookieConfig;
use sessionward_auth::SessionManager;
use std::sync::Arc;

/// State shared by the session middleware and handlers.
///
/// Cheap to clone; clones share the manager, directory and cookie settings.
pub struct SessionState<B, D> {
    /// Session manager.
    pub manager: SessionManager<B>,
    /// System of record for logins and snapshot reloads.
    pub directory: Arc<D>,
    /// Session cookie settings.
    pub cookies: Arc<CookieConfig>,
}

impl<B, D> SessionState<B, D> {
    /// Bundle the request-path dependencies.
    #[must_use]
    pub fn new(manager: SessionManager<B>, directory: Arc<D>, cookies: CookieConfig) -> Self {
        Self {
            manager,
            directory,
            cookies: Arc::new(cookies),
        }
    }
}

impl<B, D> Clone for SessionState<B, D> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            directory: Arc::clone(&self.directory),
            cookies: Arc::clone(&self.cookies),
        }
    }
}
