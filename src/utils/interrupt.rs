// src/utils/interrupt.rs
//! Cancellation and deadline guard for long-running workflow steps.

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// External stop signals a workflow honours between and during steps.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Interrupt {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fails fast if the workflow was already cancelled or is past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Races `fut` against cancellation and the deadline.
    ///
    /// The losing future is dropped, so an in-flight HTTP request is aborted.
    /// Anything it already submitted to the ledger stays submitted.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = expired => Err(Error::DeadlineExceeded),
            out = fut => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_passes_through_when_not_interrupted() {
        let interrupt = Interrupt::default();
        let out = interrupt.guard(async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn guard_reports_cancellation() {
        let token = CancellationToken::new();
        let interrupt = Interrupt::new(token.clone());
        token.cancel();
        let out = interrupt
            .guard(async { Ok::<_, Error>(()) })
            .await;
        assert!(matches!(out, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_reports_deadline() {
        let interrupt = Interrupt::default().with_deadline(Instant::now() + Duration::from_secs(1));
        let out = interrupt
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(())
            })
            .await;
        assert!(matches!(out, Err(Error::DeadlineExceeded)));
    }
}
