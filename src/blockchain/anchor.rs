// src/blockchain/anchor.rs
//! Waiting for ledger writes to become visible through the read API.
//!
//! A transaction accepted by `sendSignedTransaction` is not immediately
//! readable. The waiter polls with an interval that shrinks by
//! `decrease_step` after every miss (never below `min_interval`) until the
//! document (or a fragment of it) shows up or `max_wait` is exhausted.
//! Running out of time is reported as data, not as an error.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::blockchain::DidDocumentSource;
use crate::error::{Error, Result};
use crate::utils::interrupt::Interrupt;

/// Poll schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnchorPollParams {
    #[serde(with = "millis")]
    pub start_interval: Duration,
    #[serde(with = "millis")]
    pub min_interval: Duration,
    #[serde(with = "millis")]
    pub decrease_step: Duration,
    #[serde(with = "millis")]
    pub max_wait: Duration,
}

impl Default for AnchorPollParams {
    fn default() -> Self {
        Self {
            start_interval: Duration::from_millis(3_000),
            min_interval: Duration::from_millis(1_000),
            decrease_step: Duration::from_millis(500),
            max_wait: Duration::from_millis(60_000),
        }
    }
}

impl AnchorPollParams {
    /// # Errors
    /// [`Error::Config`] unless `min_interval > 0` and
    /// `start_interval >= min_interval`; otherwise the budget never drains.
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(Error::Config("anchor.min_interval must be greater than zero".into()));
        }
        if self.start_interval < self.min_interval {
            return Err(Error::Config(format!(
                "anchor.start_interval ({:?}) is below anchor.min_interval ({:?})",
                self.start_interval, self.min_interval
            )));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Mutable loop state, private to one `wait` call.
#[derive(Debug)]
struct AnchorPollState {
    interval: Duration,
    total_wait_time: Duration,
    attempt_count: u32,
}

/// Outcome of a wait. `document == None` means the wait budget ran out.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorPollResult {
    pub document: Option<Value>,
    pub total_wait_time: Duration,
    pub attempt_count: u32,
}

impl AnchorPollResult {
    pub fn is_timeout(&self) -> bool {
        self.document.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnchorWaiter {
    params: AnchorPollParams,
}

impl AnchorWaiter {
    /// # Errors
    /// [`Error::Config`] if `params` fail [`AnchorPollParams::validate`].
    pub fn new(params: AnchorPollParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Polls until `did` resolves and, when `target` is given, its serialized
    /// document contains `target`.
    ///
    /// Failed reads count as misses. Sleeps yield to the runtime, so other
    /// registrations keep running while this one waits.
    ///
    /// # Errors
    /// Only [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub async fn wait(
        &self,
        source: &dyn DidDocumentSource,
        did: &str,
        target: Option<&str>,
        interrupt: &Interrupt,
    ) -> Result<AnchorPollResult> {
        let mut state = AnchorPollState {
            interval: self.params.start_interval,
            total_wait_time: Duration::ZERO,
            attempt_count: 0,
        };

        loop {
            state.attempt_count += 1;
            match interrupt.guard(source.fetch_document(did)).await {
                Ok(document) if contains_target(&document, target) => {
                    log::debug!(
                        "{did} visible after {} attempt(s), {:?}",
                        state.attempt_count,
                        state.total_wait_time
                    );
                    return Ok(AnchorPollResult {
                        document: Some(document),
                        total_wait_time: state.total_wait_time,
                        attempt_count: state.attempt_count,
                    });
                }
                Ok(_) => log::debug!("{did} resolved but {target:?} not present yet"),
                Err(err @ (Error::Cancelled | Error::DeadlineExceeded)) => return Err(err),
                Err(err) => log::debug!("read of {did} failed: {err}"),
            }

            let pause = state.interval;
            interrupt
                .guard(async {
                    tokio::time::sleep(pause).await;
                    Ok(())
                })
                .await?;
            state.total_wait_time += pause;
            state.interval = pause
                .saturating_sub(self.params.decrease_step)
                .max(self.params.min_interval);

            if state.total_wait_time > self.params.max_wait {
                log::warn!(
                    "{did} not anchored after {} attempt(s), {:?}",
                    state.attempt_count,
                    state.total_wait_time
                );
                return Ok(AnchorPollResult {
                    document: None,
                    total_wait_time: state.total_wait_time,
                    attempt_count: state.attempt_count,
                });
            }
        }
    }
}

fn contains_target(document: &Value, target: Option<&str>) -> bool {
    match target {
        None => true,
        Some(fragment) => serde_json::to_string(document)
            .map(|s| s.contains(fragment))
            .unwrap_or(false),
    }
}
