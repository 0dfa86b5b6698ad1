/// Deadline wrapper for fallible async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error(transparent)]
    Inner(E),
}

/// Run `future` for at most `deadline`. The future is dropped on expiry.
pub async fn run_with_deadline<F, T, E>(deadline: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(deadline, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result = run_with_deadline(Duration::from_secs(1), async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_inner_error_is_preserved() {
        let result =
            run_with_deadline(Duration::from_secs(1), async { Err::<(), _>("boom") }).await;
        assert!(matches!(result, Err(TimeoutError::Inner("boom"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed() {
        let result = run_with_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>(())
        })
        .await;
        assert!(matches!(result, Err(TimeoutError::Elapsed(_))));
    }
}
