use super::{FetchError, FetchResult};
use std::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};

/// Retries an operation on transient failures only, with short exponential
/// backoff. Rate-limit and client errors surface immediately so the caller
/// can react (the scheduler backs off, handlers degrade).
pub async fn retry_transient<F, Fut, T>(operation: F, max_retries: usize) -> FetchResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = FetchResult<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(max_retries);

    RetryIf::spawn(retry_strategy, operation, |e: &FetchError| {
        let transient = e.is_transient();
        if transient {
            tracing::warn!("retryable fetch error: {}", e);
        }
        transient
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let attempts = AtomicUsize::new(0);
        let result: FetchResult<u32> = retry_transient(
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(FetchError::api_error(502, "bad gateway"))
                } else {
                    Ok(7)
                }
            },
            3,
        )
        .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: FetchResult<u32> = retry_transient(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::RateLimited { retry_after: Some(30) })
            },
            3,
        )
        .await;

        assert!(matches!(result, Err(FetchError::RateLimited { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_is_respected() {
        let attempts = AtomicUsize::new(0);
        let result: FetchResult<u32> = retry_transient(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Timeout { timeout_seconds: 1 })
            },
            2,
        )
        .await;

        assert!(result.is_err());
        // initial attempt + two retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
