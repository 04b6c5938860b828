//! Loader configuration.

use std::env;
use std::time::Duration;

use tokio::runtime::RuntimeFlavor;

use crate::error::{ConfigError, ConfigResult};

/// Window used by [`DispatchPolicy::Auto`] on runtimes that poll tasks in parallel.
pub const AUTO_DISPATCH_DELAY: Duration = Duration::from_millis(2);

/// Decides when a dispatch window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// [`DispatchPolicy::Drain`] on a current-thread runtime, otherwise a
    /// [`DispatchPolicy::Delay`] of [`AUTO_DISPATCH_DELAY`].
    #[default]
    Auto,
    /// Close as soon as the current burst of queued requests has been drained and the runtime has
    /// had one chance to run sibling tasks.
    ///
    /// Only loads enqueued before the worker finishes draining share a batch. On a multi-thread
    /// runtime the worker runs in parallel with its callers, so separate `load` calls issued
    /// together can land in different windows. `Loader::load_many` is unaffected: its keys are
    /// always enqueued as one op.
    Drain,
    /// Keep the window open for a fixed delay after its first request.
    Delay(Duration),
}

impl DispatchPolicy {
    /// Resolves [`DispatchPolicy::Auto`] for a runtime flavor. Other policies are returned as is.
    pub fn resolve(self, flavor: RuntimeFlavor) -> Self {
        match (self, flavor) {
            (DispatchPolicy::Auto, RuntimeFlavor::CurrentThread) => DispatchPolicy::Drain,
            (DispatchPolicy::Auto, _) => DispatchPolicy::Delay(AUTO_DISPATCH_DELAY),
            (policy, _) => policy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderConfig {
    pub dispatch: DispatchPolicy,
    /// Distinct keys per batch. A full window dispatches immediately. `None` is unbounded.
    pub max_batch_size: Option<usize>,
}

impl LoaderConfig {
    /// Load configuration from `DATALOAD_DISPATCH_DELAY_MS` and `DATALOAD_MAX_BATCH_SIZE`.
    ///
    /// A missing delay keeps [`DispatchPolicy::Auto`] and a zero delay selects
    /// [`DispatchPolicy::Drain`]. A missing or zero batch size means no limit.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(delay_ms) = parse_env::<u64>("DATALOAD_DISPATCH_DELAY_MS")? {
            config = config.with_delay(Duration::from_millis(delay_ms));
        }
        if let Some(max_batch_size) = parse_env::<usize>("DATALOAD_MAX_BATCH_SIZE")? {
            config = config.with_max_batch_size(max_batch_size);
        }
        Ok(config)
    }

    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Timer based window. A zero delay falls back to [`DispatchPolicy::Drain`].
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.dispatch =
            if delay.is_zero() { DispatchPolicy::Drain } else { DispatchPolicy::Delay(delay) };
        self
    }

    /// Caps the number of distinct keys per batch. Zero removes the cap.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = if max_batch_size == 0 { None } else { Some(max_batch_size) };
        self
    }
}

fn parse_env<T>(name: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(None),
    }
}
