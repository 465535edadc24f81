use crate::core::errors::Result;
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Capability that produces a value for a cache slot, or fails
///
/// Async closures returning `anyhow::Result<T>` implement this directly:
///
/// ```
/// use antigravity::Task;
///
/// let task: Task<u32> = Task::new("answer", || async { Ok(42) });
/// assert_eq!(task.key(), "answer");
/// ```
#[async_trait]
pub trait Producer<T>: Send + Sync {
    async fn produce(&self) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Producer<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn produce(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

/// A key-identified deferred unit of work
pub struct Task<T> {
    key: String,
    producer: Arc<dyn Producer<T>>,
}

impl<T> Task<T> {
    pub fn new<P>(key: impl Into<String>, producer: P) -> Self
    where
        P: Producer<T> + 'static,
    {
        Self {
            key: key.into(),
            producer: Arc::new(producer),
        }
    }

    /// Build a task around a producer shared with other tasks
    pub fn shared(key: impl Into<String>, producer: Arc<dyn Producer<T>>) -> Self {
        Self {
            key: key.into(),
            producer,
        }
    }

    /// Build a task whose key is derived from `name` and `args`, see [`task_key`]
    pub fn keyed<A, P>(name: &str, args: &A, producer: P) -> Result<Self>
    where
        A: Serialize + ?Sized,
        P: Producer<T> + 'static,
    {
        Ok(Self::new(task_key(name, args)?, producer))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) async fn produce(&self) -> anyhow::Result<T> {
        self.producer.produce().await
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Stable cache key for a named operation and its arguments
///
/// Equal names and equal JSON encodings of `args` always give equal keys.
pub fn task_key<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<String> {
    let encoded = serde_json::to_string(args)?;
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(encoded.as_bytes());
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..16]))
}
