use tokio::sync::oneshot;

use crate::error::LoadError;

pub type Responder<V> = oneshot::Sender<Result<V, LoadError>>;

/// Set of possible requests that can be sent to the [`crate::loader_worker::LoaderWorker`]
///
/// Load, Prime and Clear each have a single and many variant. `LoadMany` carries one responder per
/// key so every key gets its own slot in the dispatch window, while the worker still receives the
/// whole set at once.
#[derive(Debug)]
pub enum LoaderOp<K, V> {
    /// Fetch data from the resource wrapped by this data loader (or the cache).
    Load(K, Responder<V>),
    LoadMany(Vec<(K, Responder<V>)>),
    /// Add values to the cache that were fetched from elsewhere.
    Prime(K, V),
    PrimeMany(Vec<(K, V)>),
    /// Remove values from the cache so that they will be reloaded when they are next requested.
    Clear(K),
    ClearMany(Vec<K>),
    ClearAll,
    /// Close the current dispatch window now.
    Dispatch,
    /// Release every pending request with `LoadError::Cancelled` and stop the worker.
    Cancel,
}

/// Sends a single outcome, tolerating callers that stopped waiting.
pub fn respond<V>(responder: Responder<V>, outcome: Result<V, LoadError>) {
    if responder.send(outcome).is_err() {
        tracing::debug!("receiver dropped before the load completed");
    }
}
