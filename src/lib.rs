mod batch_function;
mod cache;
mod config;
mod error;
mod loader;
mod loader_op;
mod loader_worker;
#[cfg(feature = "stats")]
mod worker_stats;

pub mod content;
pub mod service;
pub mod store;

pub use batch_function::BatchFunction;
pub use cache::{Cache, CacheEntry};
pub use config::{DispatchPolicy, LoaderConfig, AUTO_DISPATCH_DELAY};
pub use error::{ConfigError, ConfigResult, FetchError, LoadError};
pub use loader::Loader;
