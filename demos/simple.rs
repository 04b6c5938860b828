use std::collections::HashMap;
use std::convert::Infallible;

use async_trait::async_trait;
use inkwell_loader::{BatchFunction, LoadError, Loader, LoaderConfig};
use tracing_subscriber::EnvFilter;

/// Looks film titles up by year in a shared table.
struct FilmsByYear;

#[async_trait]
impl BatchFunction<u16, String> for FilmsByYear {
    type Context = HashMap<u16, String>;
    type Error = Infallible;

    async fn load(years: &[u16], films: &Self::Context) -> Result<Vec<(u16, String)>, Infallible> {
        tracing::info!(?years, "loading batch");
        Ok(years.iter().filter_map(|y| films.get(y).map(|title| (*y, title.clone()))).collect())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let films = [(1968, "2001: A Space Odyssey"), (1954, "Seven Samurai"), (1957, "12 Angry Men")]
        .into_iter()
        .map(|(year, title)| (year, title.to_owned()))
        .collect::<HashMap<_, _>>();

    let config = LoaderConfig::default().with_max_batch_size(2);
    let loader = Loader::with_config(FilmsByYear, films, config);

    // Three distinct years with a cap of two per batch: two calls to the batch function.
    let years = vec![1957, 1968, 1957, 1999];
    for (year, film) in years.iter().zip(loader.load_many(years.clone()).await) {
        match film {
            Ok(title) => tracing::info!(year, %title),
            Err(LoadError::NotFound) => tracing::info!(year, "no film on record"),
            Err(e) => tracing::warn!(year, error = %e),
        }
    }

    // 1954 costs one more batch; the miss for 1999 is remembered.
    assert_eq!(loader.load(1954).await.ok().as_deref(), Some("Seven Samurai"));
    assert!(loader.load(1999).await.unwrap_err().is_not_found());

    loader.prime(1999, "Audition".to_owned()).await;
    assert!(loader.load(1999).await.unwrap_err().is_not_found());
    loader.clear(1999).await;
    loader.prime(1999, "Audition".to_owned()).await;
    assert_eq!(loader.load(1999).await.ok().as_deref(), Some("Audition"));
}
