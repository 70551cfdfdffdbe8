use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::catalog::AudioCandidate;
use crate::cli::Args;
use crate::error::{AttemptFailure, FallbackError};

use super::attempt::{Attempt, AttemptEngine, BACKGROUND_TIMEOUT, URGENT_TIMEOUT};
use super::handle::PlaybackHandle;

/// Retry policy for a fallback run
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Attempts made against each URL before moving on
    pub max_retries_per_url: u32,
    /// Timeout per retry; the last entry repeats for further retries
    pub timeouts: Vec<Duration>,
    /// Base delay before a retry, doubled on each further retry
    pub retry_delay: Duration,
    /// Add up to 25% random jitter to retry delays
    pub jitter: bool,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_url: 2,
            timeouts: vec![URGENT_TIMEOUT, Duration::from_secs(12), BACKGROUND_TIMEOUT],
            retry_delay: Duration::from_millis(250),
            jitter: true,
        }
    }
}

impl FallbackPolicy {
    /// Policy from the command line, scaling the 8s/12s/15s escalation to
    /// the given first timeout
    pub fn from_args(args: &Args) -> Self {
        let first = Duration::from_millis(args.attempt_timeout_ms);
        Self {
            max_retries_per_url: args.max_retries,
            timeouts: vec![first, first * 3 / 2, first * 15 / 8],
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            jitter: true,
        }
    }

    /// Timeout for the given retry (0-based), escalating
    pub fn timeout_for(&self, retry: u32) -> Duration {
        self.timeouts
            .get(retry as usize)
            .or_else(|| self.timeouts.last())
            .copied()
            .unwrap_or(URGENT_TIMEOUT)
    }

    /// Delay before the given retry (1-based), exponential with optional jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let base = self.retry_delay * 2u32.saturating_pow(retry.saturating_sub(1));
        if !self.jitter || base.is_zero() {
            return base;
        }
        let max_jitter = base.as_millis() as u64 / 4;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
    }

    fn attempts_per_url(&self) -> u32 {
        self.max_retries_per_url.max(1)
    }
}

/// Winning source of a fallback run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSuccess {
    pub candidate: AudioCandidate,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// States of a single fallback run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackState {
    Idle,
    TryingCandidate { index: usize, retry: u32 },
    NextRetry { index: usize, retry: u32 },
    NextCandidate { index: usize },
    ExhaustedFailure,
}

/// Tries candidates strictly in order, retrying each a bounded number of
/// times, until one starts playing.
///
/// Holds no handle of its own; every side effect goes through the handle
/// passed to [`run`](FallbackSequencer::run).
pub struct FallbackSequencer<A = AttemptEngine> {
    attempt: A,
    policy: FallbackPolicy,
}

impl FallbackSequencer<AttemptEngine> {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self::with_attempt(AttemptEngine, policy)
    }
}

impl<A: Attempt> FallbackSequencer<A> {
    pub fn with_attempt(attempt: A, policy: FallbackPolicy) -> Self {
        Self { attempt, policy }
    }

    /// Play the first candidate that works
    pub async fn run(
        &self,
        candidates: &[AudioCandidate],
        handle: &dyn PlaybackHandle,
        cancel: &CancellationToken,
    ) -> Result<PlaybackSuccess, FallbackError> {
        if candidates.is_empty() {
            return Err(FallbackError::NoCandidates);
        }

        let per_url = self.policy.attempts_per_url();
        let mut attempts = 0u32;
        let mut last_error: Option<AttemptFailure> = None;
        let mut state = FallbackState::Idle;

        loop {
            trace!(?state, "Fallback state");
            state = match state {
                FallbackState::Idle => FallbackState::NextCandidate { index: 0 },

                FallbackState::NextCandidate { index } if index < candidates.len() => {
                    FallbackState::TryingCandidate { index, retry: 0 }
                }
                FallbackState::NextCandidate { .. } => FallbackState::ExhaustedFailure,

                FallbackState::TryingCandidate { index, retry } => {
                    let candidate = &candidates[index];
                    let timeout = self.policy.timeout_for(retry);

                    handle.reset();
                    attempts += 1;

                    match self.attempt.attempt(handle, &candidate.url, timeout, cancel).await {
                        Ok(()) => {
                            info!(
                                url = %candidate.url,
                                provider = candidate.provider,
                                attempts,
                                "Playing source"
                            );
                            return Ok(PlaybackSuccess {
                                candidate: candidate.clone(),
                                attempts,
                            });
                        }
                        Err(failure) if failure.is_terminal() => {
                            debug!(%failure, attempts, "Fallback run abandoned");
                            return Err(FallbackError::Cancelled { attempts });
                        }
                        Err(failure) => {
                            log_failure(candidate, retry, &failure);
                            last_error = Some(failure);

                            if retry + 1 < per_url {
                                FallbackState::NextRetry {
                                    index,
                                    retry: retry + 1,
                                }
                            } else {
                                FallbackState::NextCandidate { index: index + 1 }
                            }
                        }
                    }
                }

                FallbackState::NextRetry { index, retry } => {
                    let delay = self.policy.backoff_for(retry);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(FallbackError::Cancelled { attempts });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    FallbackState::TryingCandidate { index, retry }
                }

                FallbackState::ExhaustedFailure => {
                    let last_error = last_error.unwrap_or(AttemptFailure::Aborted);
                    warn!(
                        attempts,
                        candidates = candidates.len(),
                        %last_error,
                        "All audio sources failed"
                    );
                    return Err(FallbackError::Exhausted {
                        attempts,
                        last_error,
                    });
                }
            };
        }
    }
}

/// Media errors hint at a broken provider rather than a blip, so log them louder
fn log_failure(candidate: &AudioCandidate, retry: u32, failure: &AttemptFailure) {
    match failure {
        AttemptFailure::MediaError(_) => warn!(
            url = %candidate.url,
            provider = candidate.provider,
            retry,
            error = %failure,
            "Provider returned unplayable media"
        ),
        _ => debug!(
            url = %candidate.url,
            provider = candidate.provider,
            retry,
            error = %failure,
            "Attempt failed"
        ),
    }
}
