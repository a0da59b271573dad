//! Request executor
//!
//! Issues one logical API call: waits for the rate budget, sends, classifies
//! the outcome, feeds whatever budget information came back into the tracker,
//! and retries according to the backoff policy.
//!
//! # Retry Logic
//!
//! | Outcome | Action |
//! |---------|--------|
//! | Rate limited | Wait until reset (else retry-after, else fallback), retry; not counted |
//! | Transient | Exponential backoff, counted; past the ceiling → `RetriesExhausted` |
//! | Query rejected | Returned immediately (partition-fatal) |
//! | Unauthorized / unbuildable | Returned immediately (crawl-fatal) |

use super::backoff::{BackoffPolicy, RetryDecision};
use super::budget::{Permit, RateBudget};
use super::clock::Clock;
use super::fetcher::{classify_status, GraphqlRequest, RawResponse, Transport};
use super::parser::{decode_search, Page};
use crate::{ApiError, ApiResult};
use std::sync::Arc;
use std::time::Duration;

/// Result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Page),

    /// Try again after `delay`; `counted` is false for rate-limit waits
    RetryAfter {
        delay: Duration,
        counted: bool,
        error: ApiError,
    },

    Fail(ApiError),
}

/// Rate-limit-aware, retrying GraphQL executor
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    budget: RateBudget,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    fallback_wait: Duration,
}

impl RequestExecutor {
    /// Creates a new executor
    ///
    /// # Arguments
    ///
    /// * `transport` - Sends the HTTP request
    /// * `budget` - Shared rate budget, checked before and updated after every call
    /// * `backoff` - Retry policy for transient failures
    /// * `clock` - Time source for every wait
    /// * `fallback_wait` - Wait used when throttled without any reset hint
    pub fn new(
        transport: Arc<dyn Transport>,
        budget: RateBudget,
        backoff: BackoffPolicy,
        clock: Arc<dyn Clock>,
        fallback_wait: Duration,
    ) -> Self {
        Self {
            transport,
            budget,
            backoff,
            clock,
            fallback_wait,
        }
    }

    pub fn budget(&self) -> &RateBudget {
        &self.budget
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Executes a request until it succeeds or fails for good
    pub async fn execute(&self, request: &GraphqlRequest) -> ApiResult<Page> {
        let mut failures: u32 = 0;

        loop {
            match self.attempt(request, failures).await {
                AttemptOutcome::Success(page) => return Ok(page),
                AttemptOutcome::Fail(error) => return Err(error),
                AttemptOutcome::RetryAfter {
                    delay,
                    counted,
                    error,
                } => {
                    if counted {
                        failures += 1;
                    }
                    tracing::warn!(
                        "Retrying in {:?} (failure {}/{}): {}",
                        delay,
                        failures,
                        self.backoff.max_retries,
                        error
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }

    /// Runs one attempt after `failures` counted failures so far
    pub async fn attempt(&self, request: &GraphqlRequest, failures: u32) -> AttemptOutcome {
        self.wait_for_budget().await;
        self.budget.consume();

        let result = match self.transport.send(request).await {
            Ok(response) => self.interpret(response),
            Err(e) => Err(ApiError::from(e)),
        };

        match result {
            Ok(page) => AttemptOutcome::Success(page),
            Err(error) => self.next_step(error, failures),
        }
    }

    async fn wait_for_budget(&self) {
        while let Permit::Wait(delay) = self.budget.may_proceed(self.clock.now()) {
            tracing::info!("Rate budget exhausted; waiting {:?} for reset", delay);
            self.clock.sleep(delay).await;
        }
    }

    /// Observes budget information, then decodes or classifies the response
    fn interpret(&self, response: RawResponse) -> ApiResult<Page> {
        self.budget
            .observe(response.remaining, response.resets_at());

        if response.status != 200 {
            return Err(classify_status(&response));
        }

        let decoded = decode_search(&response.body);
        match &decoded {
            Ok(page) => {
                if let Some((remaining, resets_at)) = page.rate {
                    self.budget.observe(remaining, resets_at);
                }
            }
            Err(ApiError::RateLimited { resets_at, .. }) => {
                self.budget.exhaust(*resets_at);
            }
            Err(_) => {}
        }
        decoded
    }

    fn next_step(&self, error: ApiError, failures: u32) -> AttemptOutcome {
        match &error {
            ApiError::RateLimited {
                resets_at,
                retry_after,
            } => {
                // An explicit retry-after is a secondary limit on this caller
                // only; the shared window budget stays as reported.
                let delay = match retry_after {
                    Some(delay) => *delay,
                    None => {
                        self.budget.exhaust(*resets_at);
                        self.budget
                            .wait_hint(self.clock.now())
                            .unwrap_or(self.fallback_wait)
                    }
                };
                AttemptOutcome::RetryAfter {
                    delay,
                    counted: false,
                    error,
                }
            }
            ApiError::Transient(msg) => match self.backoff.decide(failures + 1) {
                RetryDecision::Retry(delay) => AttemptOutcome::RetryAfter {
                    delay,
                    counted: true,
                    error,
                },
                RetryDecision::GiveUp => {
                    tracing::error!("Giving up after {} attempts: {}", failures + 1, msg);
                    AttemptOutcome::Fail(ApiError::RetriesExhausted {
                        attempts: failures + 1,
                        last: msg.clone(),
                    })
                }
            },
            _ => AttemptOutcome::Fail(error),
        }
    }
}
