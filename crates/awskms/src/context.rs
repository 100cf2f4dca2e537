//! Caller-supplied deadlines for remote operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::KmsError;

/// Per-call options passed straight through to the remote operation.
///
/// The default context has no deadline. Cancellation is dropping the
/// returned future.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` to completion, failing with [`KmsError::DeadlineExceeded`]
    /// for `arn` if the deadline passes first.
    pub(crate) async fn run<T, F>(&self, arn: &str, fut: F) -> Result<T, KmsError>
    where
        F: Future<Output = Result<T, KmsError>>,
    {
        match self.deadline {
            None => fut.await,
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| KmsError::DeadlineExceeded {
                    arn: arn.to_owned(),
                })?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_has_no_deadline() {
        let ctx = CallContext::background();
        assert!(ctx.deadline().is_none());
        let out = ctx.run("arn", async { Ok::<_, KmsError>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn expired_deadline_is_distinguishable() {
        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        let err = ctx
            .run("arn:aws:kms:us-west-2:1:key/k", std::future::pending::<Result<(), KmsError>>())
            .await
            .unwrap_err();
        match err {
            KmsError::DeadlineExceeded { arn } => assert_eq!(arn, "arn:aws:kms:us-west-2:1:key/k"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        let err = ctx
            .run("arn", async { Err::<(), _>(KmsError::InvalidArn("x".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::InvalidArn(_)));
    }
}
