pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod storage;
pub mod transcript;
pub mod types;
pub mod usage;
pub mod workspace;

pub use config::Config;
pub use error::{Result, TelemetryError};
pub use types::*;

/// Runs blocking file work on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}
