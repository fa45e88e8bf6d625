pub mod memory;
pub mod postgrest;

use crate::error::RemoteError;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryRemote;
pub use postgrest::PostgrestStore;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn count(&self, collection: &str) -> RemoteResult<u64>;

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<Value>>;

    async fn select_where(&self, collection: &str, field: &str, value: &str)
        -> RemoteResult<Vec<Value>>;

    async fn upsert(&self, collection: &str, row: &Value) -> RemoteResult<()>;
}

/// Bounds one remote call; a stalled store surfaces as a transport error.
pub async fn with_timeout<T, F>(operation: &str, timeout_ms: u64, fut: F) -> RemoteResult<T>
where
    F: std::future::Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(operation, timeout_ms)),
    }
}
