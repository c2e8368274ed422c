//! Deadlines for vector store calls.
//!
//! Provider calls carry their own deadline (see
//! [`EmbeddingConfig::call_deadline`](crate::config::EmbeddingConfig::call_deadline)).
//! Store calls go through [`store_call`], which turns an elapsed timer
//! into [`IndexError::Timeout`] naming the collection and operation.

use std::future::Future;
use std::time::Duration;

use capability_lookup_core::error::IndexError;

pub async fn store_call<T, F>(
    collection: &str,
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, IndexError>
where
    F: Future<Output = Result<T, IndexError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(IndexError::Timeout {
            collection: collection.to_string(),
            operation,
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_call_is_an_index_timeout() {
        let err = store_call::<usize, _>(
            "capability_chunks",
            "query",
            Duration::from_millis(20),
            futures::future::pending(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.collection(), "capability_chunks");
        assert_eq!(err.operation(), "query");
        assert!(matches!(err, IndexError::Timeout { .. }));
    }

    #[tokio::test]
    async fn finished_call_passes_through() {
        let n = store_call("c", "count", Duration::from_secs(1), async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(n, 3);
    }
}
