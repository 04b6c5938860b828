use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Drop;
use std::sync::Arc;

use futures::future::{self, FutureExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::{
    batch_function::BatchFunction,
    cache::CacheEntry,
    config::LoaderConfig,
    error::LoadError,
    loader_op::LoaderOp,
    loader_worker::LoaderWorker,
};

/// Batch loads values from some expensive resource, primarily intended for mitigating GraphQL's
/// N+1 problem.
///
/// Users can call [`Loader::load`] and [`Loader::load_many`] to fetch values from the underlying
/// resource or cache. The cache can be cleared with calls to [`Loader::clear`],
/// [`Loader::clear_many`] and [`Loader::clear_all`], and values can be added to the cache
/// out-of-band through the use of [`Loader::prime`] and [`Loader::prime_many`].
///
/// The `Loader` struct acts as an intermediary between the async domain in which `load` calls are
/// invoked and the pseudo-single-threaded domain of the `LoaderWorker`. Callers can invoke the
/// `Loader` from multiple parallel tasks, and the loader will enqueue the requested operations on
/// the request queue for processing by its `LoaderWorker`. The worker processes the requests
/// sequentially and provides results via response oneshot channels back to the Loader.
///
/// A `Loader` is meant to live for exactly one incoming request. Its cache is never shared, and
/// dropping the loader stops the worker and releases anything still waiting with
/// [`LoadError::Cancelled`].
pub struct Loader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
{
    request_tx: mpsc::UnboundedSender<LoaderOp<K, V>>,
    load_task_handle: tokio::task::JoinHandle<()>,
}

impl<K, V> Drop for Loader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
{
    fn drop(&mut self) {
        self.load_task_handle.abort();
    }
}

impl<K, V> Loader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
{
    /// Creates a new Loader for the provided BatchFunction and Context type, using the default
    /// [`LoaderConfig`].
    ///
    /// Note: the batch function is passed in as a marker for type inference.
    pub fn new<F, ContextT>(batch_function: F, context: ContextT) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    {
        Self::with_config(batch_function, context, LoaderConfig::default())
    }

    /// Creates a new Loader with an explicit dispatch configuration.
    ///
    /// Must be called from within a tokio runtime; the worker task is spawned immediately.
    /// [`DispatchPolicy::Auto`](crate::DispatchPolicy::Auto) is resolved against that runtime.
    pub fn with_config<F, ContextT>(_: F, context: ContextT, mut config: LoaderConfig) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    {
        config.dispatch = config.dispatch.resolve(Handle::current().runtime_flavor());
        tracing::trace!(dispatch = ?config.dispatch, max_batch_size = ?config.max_batch_size);
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = LoaderWorker::<K, V, F, HashMap<K, CacheEntry<V>>, ContextT>::new(
            HashMap::new(),
            rx,
            Arc::new(context),
            config,
        );
        Self { request_tx: tx, load_task_handle: tokio::task::spawn(worker.start()) }
    }

    /// Loads a value from the underlying resource.
    ///
    /// Returns [`LoadError::NotFound`] if the BatchFunction did not return the key, and
    /// [`LoadError::Fetch`] if the BatchFunction failed for the batch this key was part of.
    ///
    /// If the outcome is already in the loader cache, it is returned as soon as it is processed.
    /// Otherwise, the requested key is enqueued for batch loading in the current dispatch window.
    pub async fn load(&self, key: K) -> Result<V, LoadError> {
        let (response_tx, response_rx) = oneshot::channel();
        if self.request_tx.send(LoaderOp::Load(key, response_tx)).is_err() {
            return Err(LoadError::Cancelled);
        }
        response_rx.await.unwrap_or(Err(LoadError::Cancelled))
    }

    /// Loads many values at once.
    ///
    /// Results are in the same order as `keys`. The keys reach the worker as a single op, so all
    /// keys that miss the cache land in the same dispatch window (unless `max_batch_size` splits
    /// it), and each distinct key is fetched at most once.
    pub async fn load_many(&self, keys: Vec<K>) -> Vec<Result<V, LoadError>> {
        let (requests, receivers): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .map(|key| {
                let (response_tx, response_rx) = oneshot::channel();
                ((key, response_tx), response_rx)
            })
            .unzip();
        // On a stopped worker the responders are dropped with the op, which cancels every key.
        self.send(LoaderOp::LoadMany(requests));
        let responses = receivers
            .into_iter()
            .map(|response_rx| response_rx.map(|response| response.unwrap_or(Err(LoadError::Cancelled))));
        future::join_all(responses).await
    }

    /// Adds a value to the cache. A key that already has a cached outcome keeps it.
    pub async fn prime(&self, key: K, value: V) {
        self.send(LoaderOp::Prime(key, value));
    }

    /// Adds many values to the cache at once.
    pub async fn prime_many(&self, key_vals: Vec<(K, V)>) {
        self.send(LoaderOp::PrimeMany(key_vals));
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested, even if a fetch for it is already in
    /// flight.
    pub async fn clear(&self, key: K) {
        self.send(LoaderOp::Clear(key));
    }

    /// Removes multiple values from the cache at once.
    ///
    /// These keys will be reloaded when requested.
    pub async fn clear_many(&self, keys: Vec<K>) {
        self.send(LoaderOp::ClearMany(keys));
    }

    /// Empties the cache.
    pub async fn clear_all(&self) {
        self.send(LoaderOp::ClearAll);
    }

    /// Closes the current dispatch window without waiting for the configured policy.
    pub async fn dispatch(&self) {
        self.send(LoaderOp::Dispatch);
    }

    /// Releases every pending load with [`LoadError::Cancelled`] and stops the worker.
    ///
    /// Loads issued afterwards also fail with `Cancelled`.
    pub async fn cancel(&self) {
        self.send(LoaderOp::Cancel);
    }

    fn send(&self, op: LoaderOp<K, V>) {
        if let Err(e) = self.request_tx.send(op) {
            tracing::debug!(op = ?e.0, "loader worker has stopped");
        }
    }
}
