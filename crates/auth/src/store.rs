//! Errors shared by the storage ports.

use std::future::Future;
use std::time::Duration;

use keyward_core::AuthError;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::store(err.to_string())
    }
}

/// Await a store call under a deadline.
///
/// A missed deadline is reported as `BackendUnavailable`; store failures as
/// `Store`. Neither is ever read as "record absent".
pub async fn with_deadline<T, F>(what: &str, timeout: Duration, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => Err(AuthError::unavailable(format!("{what} timed out after {timeout:?}"))),
    }
}
