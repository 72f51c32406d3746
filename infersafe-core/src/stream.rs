//! Streamed delivery of a request outcome to a caller.
//!
//! The caller's wait deadline grows with the queue backlog so that requests
//! admitted behind a long queue are not timed out before their batch runs.

use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};

use crate::error::InferenceError;
use crate::handle::{Outcome, ResultHandle};

/// Lower bound of the caller wait
pub const BASE_CALLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound of the caller wait
pub const MAX_CALLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra wait per full batch already queued
const PER_BATCH_ALLOWANCE: Duration = Duration::from_secs(5);

pub const TIMEOUT_MARKER: &str = "Error: Request timed out, please try again";

/// `min(30s, 10s + queue_len / batch_size_limit * 5s)`
pub fn caller_timeout(queue_len: usize, batch_size_limit: usize) -> Duration {
    let batches = queue_len as f64 / batch_size_limit.max(1) as f64;
    let wait = BASE_CALLER_TIMEOUT + PER_BATCH_ALLOWANCE.mul_f64(batches);
    wait.min(MAX_CALLER_TIMEOUT)
}

/// Caller-visible text fragments for an outcome
///
/// Success yields each whitespace-separated token followed by one space.
/// Failures yield a single error marker.
pub fn render_outcome(outcome: Outcome) -> Vec<String> {
    match outcome {
        Ok(text) => text
            .split_whitespace()
            .map(|token| format!("{} ", token))
            .collect(),
        Err(InferenceError::CallerTimeout { .. }) => vec![TIMEOUT_MARKER.to_string()],
        Err(err) => vec![format!("Error: {}: {}", err.kind(), err)],
    }
}

/// Wait up to `timeout` for `handle`, then stream the rendered outcome
pub fn token_stream(
    handle: ResultHandle,
    timeout: Duration,
) -> impl Stream<Item = String> + Send + 'static {
    stream::once(async move { handle.wait_timeout(timeout).await })
        .flat_map(|outcome| stream::iter(render_outcome(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_timeout_scaling() {
        assert_eq!(caller_timeout(0, 10), Duration::from_secs(10));
        assert_eq!(caller_timeout(10, 10), Duration::from_secs(15));
        assert_eq!(caller_timeout(5, 10), Duration::from_millis(12_500));
        assert_eq!(caller_timeout(100, 10), Duration::from_secs(30));
        // A zero limit is treated as one
        assert_eq!(caller_timeout(1, 0), Duration::from_secs(15));
    }

    #[test]
    fn test_render_success_tokens() {
        let fragments = render_outcome(Ok("mock  response\nhere".to_string()));
        assert_eq!(fragments, vec!["mock ", "response ", "here "]);
        assert!(render_outcome(Ok(String::new())).is_empty());
    }

    #[test]
    fn test_render_failures() {
        let fragments = render_outcome(Err(InferenceError::RetriesExhausted { attempts: 6 }));
        assert_eq!(
            fragments,
            vec!["Error: AllRetriesExhaustedError: Inference failed after all retries (6 attempts)"]
        );

        let fragments = render_outcome(Err(InferenceError::CallerTimeout {
            timeout: Duration::from_secs(10),
        }));
        assert_eq!(fragments, vec![TIMEOUT_MARKER]);
    }

    #[tokio::test]
    async fn test_stream_resolved_handle() {
        let handle = ResultHandle::resolved(Ok("hello world".to_string()));
        let out: Vec<String> = token_stream(handle, Duration::from_secs(1)).collect().await;
        assert_eq!(out.concat(), "hello world ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_times_out() {
        let handle = ResultHandle::pending();
        let out: Vec<String> = token_stream(handle.clone(), Duration::from_secs(10))
            .collect()
            .await;
        assert_eq!(out, vec![TIMEOUT_MARKER]);

        // Resolving after the caller gave up is harmless
        assert!(handle.resolve(Ok("late".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_waits_for_resolution() {
        let handle = ResultHandle::pending();
        let producer = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            producer.resolve(Err(InferenceError::QueueFull { capacity: 1 }));
        });

        let out: Vec<String> = token_stream(handle, Duration::from_secs(10)).collect().await;
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("Error: QueueFullError: "));
    }
}
