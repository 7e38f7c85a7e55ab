//! Per-request suspension check against the Data Store.
//!
//! The nightly sweeps flip user state asynchronously between requests, so
//! the guard re-reads the user row on every invocation — no caching, ever.
//! The loaded snapshot is handed to the caller so the wrapped handler does
//! not need a second read.

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response};

use crate::store::{DataStore, StoreError, User, UserStatus};

#[derive(Debug)]
pub enum GuardError {
    /// The account is suspended; the request must not proceed.
    Blocked,
    /// No user row for the authenticated identity.
    UnknownUser(String),
    Store(StoreError),
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::Blocked => write!(f, "account is suspended"),
            GuardError::UnknownUser(id) => write!(f, "unknown user: {id}"),
            GuardError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for GuardError {}

impl From<StoreError> for GuardError {
    fn from(e: StoreError) -> Self {
        GuardError::Store(e)
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        match self {
            GuardError::Blocked => (StatusCode::FORBIDDEN, "account is suspended").into_response(),
            GuardError::UnknownUser(_) => {
                (StatusCode::UNAUTHORIZED, "unknown user").into_response()
            }
            GuardError::Store(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

/// Gate for mutating request paths.  Call [`StatusGuard::check`] before the
/// handler body runs; a `Blocked` error maps to 403 and is never retried.
#[derive(Clone)]
pub struct StatusGuard {
    store: Arc<dyn DataStore>,
}

impl StatusGuard {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Re-read the user's current state and reject if blocked.
    ///
    /// `status == SUSPENDED` and `suspended_at` being set are checked
    /// independently: other code paths may write the two fields
    /// non-atomically, and either signal alone blocks the request.
    pub fn check(&self, user_id: &str) -> Result<User, GuardError> {
        let user = self
            .store
            .user(user_id)?
            .ok_or_else(|| GuardError::UnknownUser(user_id.to_string()))?;
        if user.status == UserStatus::Suspended || user.suspended_at.is_some() {
            return Err(GuardError::Blocked);
        }
        Ok(user)
    }
}
