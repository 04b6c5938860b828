use async_trait::async_trait;

/// A `BatchFunction` defines the method through which some `Loader` may fetch
/// batched data from some resource. The `BatchFunction` receives a slice of distinct keys, in the
/// order they were first requested during the `Loader`'s most recent dispatch window, and some
/// user defined context struct.
///
/// The reply can contain the loaded key value pairs in any order. Requesters of keys whose values
/// are not returned receive [`crate::LoadError::NotFound`], and that absence is cached for the
/// lifetime of the loader.
///
/// A failure is reported for the whole call: every requester in the batch receives the same
/// [`crate::LoadError::Fetch`], and nothing is cached so that a later load can try again.
///
/// Multiple `BatchFunctions` (and therefore loaders) can share the same context (likely through an
/// `Arc`).
#[async_trait]
pub trait BatchFunction<K, V> {
    type Context;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load(keys: &[K], context: &Self::Context) -> Result<Vec<(K, V)>, Self::Error>;
}
