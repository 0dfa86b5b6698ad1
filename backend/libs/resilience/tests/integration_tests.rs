/// Integration tests for resilience library
use resilience::{run_with_deadline, with_retry, RetryConfig, RetryError, TimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq)]
enum StoreError {
    Transient,
    Corrupt,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn quick(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    }
}

// Deadline wrapped around a retry loop: the whole budget is bounded.
#[tokio::test(start_paused = true)]
async fn test_deadline_caps_retry_loop() {
    let config = RetryConfig {
        max_retries: 100,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(1),
        jitter: false,
        ..Default::default()
    };

    let result = run_with_deadline(
        Duration::from_secs(5),
        with_retry(config, |_: &StoreError| true, || async {
            Err::<(), _>(StoreError::Transient)
        }),
    )
    .await;

    assert!(matches!(result, Err(TimeoutError::Elapsed(_))));
}

#[tokio::test]
async fn test_retry_inside_deadline_surfaces_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result = run_with_deadline(
        Duration::from_secs(5),
        with_retry(quick(1), |e: &StoreError| *e == StoreError::Transient, move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(StoreError::Transient) }
        }),
    )
    .await;

    match result {
        Err(TimeoutError::Inner(RetryError::Exhausted { attempts, last })) => {
            assert_eq!(attempts, 2);
            assert_eq!(last, StoreError::Transient);
        }
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_mixed_errors_stop_on_permanent() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result = with_retry(quick(5), |e: &StoreError| *e == StoreError::Transient, move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err::<(), _>(StoreError::Transient)
            } else {
                Err(StoreError::Corrupt)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap_err().into_inner(), StoreError::Corrupt);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
