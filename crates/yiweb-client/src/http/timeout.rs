//! Timeout and cancellation races
//!
//! Both helpers drop the losing future, so an abandoned network call is
//! actually torn down rather than left to complete in the background.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::http::RequestError;

/// Race `future` against a timer of `timeout`.
///
/// If the timer fires first the result is a `Timeout` error and `future` is
/// dropped; a late completion can never be observed.
pub async fn with_timeout<F, T>(future: F, timeout: Duration) -> Result<T, RequestError>
where
    F: Future<Output = Result<T, RequestError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_elapsed) => Err(RequestError::timeout(timeout.as_millis() as u64)),
    }
}

/// Race `future` against `token`; cancellation yields a `Cancelled` error.
///
/// A token that is already cancelled wins before `future` is polled.
pub async fn with_cancellation<F, T>(future: F, token: &CancellationToken) -> Result<T, RequestError>
where
    F: Future<Output = Result<T, RequestError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RequestError::cancelled()),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_succeeds() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, RequestError>(1)
            },
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, RequestError>(1)
            },
            Duration::from_millis(100),
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message, "request timed out: 100ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_error_passes_through() {
        let result: Result<(), _> = with_timeout(
            async { Err(RequestError::new(ErrorKind::Network, "refused")) },
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_precancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let result = with_cancellation(async { Ok::<_, RequestError>(5) }, &token).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = with_cancellation(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, RequestError>(())
            },
            &token,
        )
        .await;
        assert_eq!(result.unwrap_err().message, "cancelled by user");
    }
}
