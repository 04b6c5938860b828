use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// A failure of a whole `BatchFunction` call, shared by every caller waiting on that batch.
pub type FetchError = Arc<dyn Error + Send + Sync + 'static>;

/// Outcome of a [`crate::Loader::load`] that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The batch function ran and did not return a value for the key.
    ///
    /// Memoized for the lifetime of the loader.
    #[error("no value exists for the requested key")]
    NotFound,
    /// The batch function itself failed. Never cached; a later load opens a new batch.
    #[error("batch fetch failed: {0}")]
    Fetch(#[source] FetchError),
    /// The loader was cancelled or dropped before the request completed.
    #[error("loader was cancelled before the request completed")]
    Cancelled,
}

impl LoadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::NotFound)
    }
}

/// Errors raised while reading loader configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
