use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::slice;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, OptionFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tracing::{span, Level};
use tracing_futures::Instrument;

#[cfg(feature = "stats")]
use crate::worker_stats::WorkerStats;
use crate::{
    batch_function::BatchFunction,
    cache::{Cache, CacheEntry},
    config::{DispatchPolicy, LoaderConfig},
    error::{FetchError, LoadError},
    loader_op::{respond, LoaderOp, Responder},
};

/// Result of one batch function call, tagged with the batch it belongs to.
type BatchResult<K, V> = (u64, Result<Vec<(K, V)>, FetchError>);

/// Distinct keys collected for one batch, in first-seen order, with every caller waiting on each
/// key.
struct DispatchWindow<K, V> {
    keys: Vec<K>,
    waiters: HashMap<K, Vec<Responder<V>>>,
}

impl<K, V> Default for DispatchWindow<K, V> {
    fn default() -> Self {
        Self { keys: Vec::new(), waiters: HashMap::new() }
    }
}

impl<K, V> DispatchWindow<K, V>
where
    K: Eq + Hash + Clone,
{
    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    /// Adds a caller to a key that is already part of this window. Hands the responder back if
    /// the key is not.
    fn attach(&mut self, key: &K, responder: Responder<V>) -> Result<(), Responder<V>> {
        match self.waiters.get_mut(key) {
            Some(waiters) => {
                waiters.push(responder);
                Ok(())
            }
            None => Err(responder),
        }
    }

    fn register(&mut self, key: K, responder: Responder<V>) {
        self.keys.push(key.clone());
        self.waiters.insert(key, vec![responder]);
    }

    #[cfg_attr(not(feature = "stats"), allow(dead_code))]
    fn waiter_count(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }
}

/// A `LoaderWorker` is the "single-thread" worker task that actually does the loading work.
///
/// Once started, it runs in a loop until the parent Loader aborts it's `JoinHandle`, drops the
/// request queue tx channel, or sends `LoaderOp::Cancel`. All of the loader's mutable state (the
/// cache, the open dispatch window, and the in-flight batches) lives here, so nothing needs a lock.
///
/// Each turn of the loop does one of three things:
///
/// 1. Receive a burst of requests. The first op is awaited, then the queue is flushed
///    synchronously until it is empty. Prime and Clear requests are applied to the cache
///    immediately. Each key of a Load or LoadMany request is answered from the cache if
///    possible; otherwise the caller is attached to the batch already fetching that key, or to
///    the key's slot in the open window, or the key is staged in the open window as a new slot.
/// 2. Close the open window. Under `DispatchPolicy::Drain` this happens at the end of the burst,
///    after yielding once so sibling tasks can enqueue their loads. Under `DispatchPolicy::Delay`
///    it happens when the window's deadline fires. A `Dispatch` op or a full window closes it
///    early. Closing hands the window's keys to the `BatchFunction` and replaces it with a fresh
///    empty window, so new requests never touch a batch that is in flight.
/// 3. Complete a batch. Each key's outcome (value or not-found) is fanned out to every caller
///    waiting on that key and cached, unless the key was cleared or primed in the meantime. A
///    failed batch sends the same error to all of its callers and caches nothing.
pub struct LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    CacheT: Cache,
    ContextT: Send + Sync + 'static,
{
    cache: CacheT,
    request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
    config: LoaderConfig,
    window: DispatchWindow<K, V>,
    deadline: Option<Pin<Box<Sleep>>>,
    /// Windows that have been handed to the batch function and not completed yet.
    batches: HashMap<u64, DispatchWindow<K, V>>,
    /// The batch responsible for each in-flight key. A cleared key is removed from here so that
    /// its stale result is not cached.
    in_flight_keys: HashMap<K, u64>,
    in_flight: FuturesUnordered<BoxFuture<'static, BatchResult<K, V>>>,
    next_batch_id: u64,
    context: Arc<ContextT>,
    phantom_batch_function: PhantomData<F>,
    debug_name: &'static str,
    #[cfg(feature = "stats")]
    stats: WorkerStats,
}

impl<K, V, F, CacheT, ContextT> LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    CacheT: Cache<K = K, V = CacheEntry<V>>,
    ContextT: Send + Sync + 'static,
{
    pub fn new(
        cache: CacheT,
        request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
        context: Arc<ContextT>,
        config: LoaderConfig,
    ) -> Self {
        let debug_name = std::any::type_name::<(K, V)>();
        Self {
            cache,
            request_rx,
            config,
            window: DispatchWindow::default(),
            deadline: None,
            batches: HashMap::new(),
            in_flight_keys: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            next_batch_id: 0,
            context,
            phantom_batch_function: PhantomData,
            debug_name,
            #[cfg(feature = "stats")]
            stats: WorkerStats::new(debug_name),
        }
    }

    pub async fn start(self) {
        let span = span!(Level::TRACE, "LoaderWorker", kv = self.debug_name);
        self.run().instrument(span).await
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                op = self.request_rx.recv() => match op {
                    None => {
                        tracing::info!("Tx channel closed. Terminating LoaderWorker.");
                        return;
                    }
                    Some(op) => {
                        if self.receive_burst(op).await.is_break() {
                            return;
                        }
                    }
                },
                Some(()) = OptionFuture::from(self.deadline.as_mut()), if self.deadline.is_some() => {
                    self.dispatch();
                }
                Some(completed) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.complete(completed);
                }
            }
        }
    }

    async fn receive_burst(&mut self, op: LoaderOp<K, V>) -> ControlFlow<()> {
        self.mux_op(op)?;
        self.drain_queue()?;
        if self.window.is_empty() {
            return ControlFlow::Continue(());
        }
        match self.config.dispatch {
            // `Auto` is resolved by the `Loader` before the worker starts.
            DispatchPolicy::Drain | DispatchPolicy::Auto => {
                // Sibling resolvers spawned as tasks get one turn to enqueue their loads.
                tokio::task::yield_now().await;
                self.drain_queue()?;
                self.dispatch();
            }
            DispatchPolicy::Delay(delay) => {
                if self.deadline.is_none() {
                    self.deadline = Some(Box::pin(tokio::time::sleep(delay)));
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn drain_queue(&mut self) -> ControlFlow<()> {
        while let Some(Some(op)) = self.request_rx.recv().now_or_never() {
            self.mux_op(op)?;
        }
        ControlFlow::Continue(())
    }

    #[tracing::instrument(skip(self))]
    fn mux_op(&mut self, op: LoaderOp<K, V>) -> ControlFlow<()> {
        match op {
            LoaderOp::Load(key, responder) => self.load(key, responder),
            LoaderOp::LoadMany(requests) => {
                for (key, responder) in requests {
                    self.load(key, responder);
                }
            }
            LoaderOp::Prime(key, value) => {
                self.cache.insert_if_absent(key, CacheEntry::Loaded(value));
            }
            LoaderOp::PrimeMany(key_vals) => {
                for (key, value) in key_vals {
                    self.cache.insert_if_absent(key, CacheEntry::Loaded(value));
                }
            }
            LoaderOp::Clear(key) => self.clear(slice::from_ref(&key)),
            LoaderOp::ClearMany(keys) => self.clear(&keys),
            LoaderOp::ClearAll => {
                self.cache.flush();
                self.in_flight_keys.clear();
            }
            LoaderOp::Dispatch => self.dispatch(),
            LoaderOp::Cancel => {
                self.cancel();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn load(&mut self, key: K, responder: Responder<V>) {
        #[cfg(feature = "stats")]
        self.stats.record_load_request(1);

        if let Some(entry) = self.cache.get(&key) {
            respond(responder, outcome(entry));
            #[cfg(feature = "stats")]
            self.stats.record_cache_hits(1);
            return;
        }

        let in_flight = self.in_flight_keys.get(&key).and_then(|id| self.batches.get_mut(id));
        let responder = match in_flight {
            Some(batch) => match batch.attach(&key, responder) {
                Ok(()) => return,
                Err(responder) => responder,
            },
            None => responder,
        };
        let responder = match self.window.attach(&key, responder) {
            Ok(()) => return,
            Err(responder) => responder,
        };

        if self.config.max_batch_size.map_or(false, |max| self.window.len() >= max) {
            self.dispatch();
        }
        tracing::debug!(?key, "staged for loading");
        self.window.register(key, responder);
    }

    fn clear(&mut self, keys: &[K]) {
        self.cache.remove(keys);
        for key in keys {
            self.in_flight_keys.remove(key);
        }
    }

    #[tracing::instrument(skip(self))]
    fn dispatch(&mut self) {
        self.deadline = None;
        if self.window.is_empty() {
            return;
        }
        let window = mem::take(&mut self.window);
        let id = self.next_batch_id;
        self.next_batch_id += 1;

        let keys = window.keys.clone();
        tracing::debug!(batch = id, ?keys, "dispatching batch");
        #[cfg(feature = "stats")]
        self.stats.record_load_exec(window.waiter_count() as u32);

        for key in keys.iter() {
            self.in_flight_keys.insert(key.clone(), id);
        }
        self.batches.insert(id, window);
        self.in_flight.push(fetch_batch::<K, V, F, ContextT>(id, keys, Arc::clone(&self.context)));
    }

    fn complete(&mut self, (id, result): BatchResult<K, V>) {
        let DispatchWindow { keys, mut waiters } = match self.batches.remove(&id) {
            Some(batch) => batch,
            None => return,
        };

        match result {
            Ok(replies) => {
                let requested = keys.len();
                let resolved = match_replies(keys, replies);
                let found = resolved.iter().filter(|(_, entry)| entry.is_loaded()).count();
                #[cfg(feature = "stats")]
                self.stats.record_load_exec_completed(requested as u32, found as u32);
                tracing::debug!(batch = id, requested, found, "batch completed");

                for (key, entry) in resolved {
                    for responder in waiters.remove(&key).unwrap_or_default() {
                        respond(responder, outcome(&entry));
                    }
                    // A value primed while the batch was in flight wins over the fetched one.
                    if self.release_in_flight(&key, id) {
                        self.cache.insert_if_absent(key, entry);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(batch = id, %error, "batch fetch failed");
                for key in keys {
                    for responder in waiters.remove(&key).unwrap_or_default() {
                        respond(responder, Err(LoadError::Fetch(Arc::clone(&error))));
                    }
                    self.release_in_flight(&key, id);
                }
            }
        }
    }

    /// Returns true if `id` was still the batch responsible for `key`.
    fn release_in_flight(&mut self, key: &K, id: u64) -> bool {
        if self.in_flight_keys.get(key) == Some(&id) {
            self.in_flight_keys.remove(key);
            true
        } else {
            false
        }
    }

    fn cancel(&mut self) {
        let window = mem::take(&mut self.window);
        let pending = self.batches.drain().map(|(_, batch)| batch).chain(Some(window));

        let mut released = 0usize;
        for batch in pending {
            for responder in batch.waiters.into_values().flatten() {
                respond(responder, Err(LoadError::Cancelled));
                released += 1;
            }
        }
        self.in_flight_keys.clear();
        self.deadline = None;
        // Dropping the fetch futures discards whatever they would have returned.
        self.in_flight = FuturesUnordered::new();
        tracing::info!(released, "LoaderWorker cancelled");
    }
}

fn outcome<V: Clone>(entry: &CacheEntry<V>) -> Result<V, LoadError> {
    match entry {
        CacheEntry::Loaded(value) => Ok(value.clone()),
        CacheEntry::Missing => Err(LoadError::NotFound),
    }
}

/// Pairs every requested key with its outcome. Reply entries for keys that were not requested are
/// dropped, and a key replied to more than once keeps the last value.
fn match_replies<K, V>(keys: Vec<K>, replies: Vec<(K, V)>) -> Vec<(K, CacheEntry<V>)>
where
    K: Eq + Hash,
{
    let mut replies = replies.into_iter().collect::<HashMap<_, _>>();
    keys.into_iter()
        .map(|key| {
            let entry = match replies.remove(&key) {
                Some(value) => CacheEntry::Loaded(value),
                None => CacheEntry::Missing,
            };
            (key, entry)
        })
        .collect()
}

fn fetch_batch<K, V, F, ContextT>(
    id: u64,
    keys: Vec<K>,
    context: Arc<ContextT>,
) -> BoxFuture<'static, BatchResult<K, V>>
where
    K: 'static + Send + Sync,
    V: 'static + Send,
    F: 'static + BatchFunction<K, V, Context = ContextT>,
    ContextT: Send + Sync + 'static,
{
    async move {
        let result = F::load(&keys, &context).await.map_err(|e| Arc::new(e) as FetchError);
        (id, result)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_are_matched_by_key() {
        let resolved = match_replies(vec![1, 2, 3], vec![(3, "c"), (9, "stray"), (1, "a"), (1, "a2")]);

        assert_eq!(
            resolved,
            vec![(1, CacheEntry::Loaded("a2")), (2, CacheEntry::Missing), (3, CacheEntry::Loaded("c"))]
        );
        // Only requested keys count as found.
        assert_eq!(resolved.iter().filter(|(_, entry)| entry.is_loaded()).count(), 2);
    }
}
