//! Bounded retry with a caller-supplied error classifier.

use std::future::Future;
use std::time::Duration;

/// Constant-backoff retry budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// The admin submission budget: 30 attempts with a constant backoff.
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_millis(100),
        }
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// attempt budget is spent. The terminal error is returned unchanged.
///
/// `should_retry` sees every error, including the one that exhausts the
/// budget, so classifiers may count failures as a side effect.
pub async fn retry_on_error<T, E, F, Fut, P>(
    policy: RetryPolicy,
    mut should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) || attempt >= policy.max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    /// Closure that bumps `attempts` and returns the next value of `replies`,
    /// repeating the final reply once the sequence is spent.
    fn scripted<T, E>(
        attempts: Arc<AtomicU32>,
        replies: Vec<Result<T, E>>,
    ) -> impl FnMut() -> futures::future::BoxFuture<'static, Result<T, E>>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = replies[n.min(replies.len() - 1)].clone();
            Box::pin(async move { reply })
        }
    }

    #[tokio::test]
    async fn stops_on_first_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let op = scripted::<u32, &str>(Arc::clone(&attempts), vec![Ok(7)]);
        let result = retry_on_error(fast(30), |_| true, op).await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let attempts = Arc::new(AtomicU32::new(0));
        let op = scripted::<(), &str>(Arc::clone(&attempts), vec![Err("duplicate")]);
        let result = retry_on_error(fast(30), |_| false, op).await;
        assert_eq!(result, Err("duplicate"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_the_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let classified = Arc::new(AtomicU32::new(0));
        let op = scripted::<(), &str>(Arc::clone(&attempts), vec![Err("transient")]);
        let result = retry_on_error(
            fast(30),
            {
                let classified = Arc::clone(&classified);
                move |_: &&str| {
                    classified.fetch_add(1, Ordering::SeqCst);
                    true
                }
            },
            op,
        )
        .await;
        assert_eq!(result, Err("transient"));
        assert_eq!(attempts.load(Ordering::SeqCst), 30);
        // The classifier runs on every failure, the terminal one included.
        assert_eq!(classified.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn eventual_success_within_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let op = scripted::<&str, &str>(
            Arc::clone(&attempts),
            vec![Err("transient"), Err("transient"), Ok("done")],
        );
        let result = retry_on_error(fast(5), |_| true, op).await;
        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
