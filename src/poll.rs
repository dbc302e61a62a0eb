//! Cancellable, deadline-bounded poll loops.
//!
//! Every wait on a remote asynchronous operation goes through a [`Poller`].
//! A poll loop suspends for the configured interval between observations,
//! gives up with [`PollError::Timeout`] once the maximum wait has elapsed, and
//! stops with [`PollError::Cancelled`] as soon as the shared cancellation
//! token fires. Cancelling only stops the watching; the remote operation is
//! left running.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{PollError, Result};

/// Default interval between observations.
const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Default maximum wait (four hours).
const DEFAULT_MAX_WAIT_SECS: u64 = 4 * 60 * 60;

/// Timing of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between two observations.
    pub interval: Duration,
    /// Maximum time spent waiting for a terminal observation.
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
        }
    }
}

impl PollSettings {
    /// Creates poll settings.
    #[must_use]
    pub const fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// Result of a single observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    /// A terminal observation was made.
    Ready(T),
    /// The operation is still in progress.
    Pending,
}

/// Drives poll loops with shared settings and cancellation.
#[derive(Debug, Clone)]
pub struct Poller {
    settings: PollSettings,
    cancel: CancellationToken,
}

impl Poller {
    /// Creates a poller.
    #[must_use]
    pub const fn new(settings: PollSettings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }

    /// Returns the poll settings.
    #[must_use]
    pub const fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Returns the cancellation token observed by this poller.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Starts a poll window for `what`. The deadline starts counting now.
    #[must_use]
    pub fn start(&self, what: impl Into<String>) -> PollWindow {
        let started = Instant::now();
        PollWindow {
            what: what.into(),
            started,
            deadline: started + self.settings.max_wait,
            interval: self.settings.interval,
            cancel: self.cancel.clone(),
        }
    }

    /// Calls `observe` until it returns [`PollStep::Ready`].
    ///
    /// # Errors
    ///
    /// Returns the observation's error, [`PollError::Timeout`] once the maximum
    /// wait elapsed, or [`PollError::Cancelled`] if cancellation was requested.
    pub async fn until<T, F, Fut>(&self, what: impl Into<String>, mut observe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStep<T>>>,
    {
        let window = self.start(what);
        loop {
            match window.observe(observe()).await? {
                PollStep::Ready(value) => return Ok(value),
                PollStep::Pending => window.wait_next().await?,
            }
        }
    }
}

/// One running poll loop.
///
/// Used directly when the observation needs mutable access to state owned by
/// the caller between iterations.
#[derive(Debug)]
pub struct PollWindow {
    what: String,
    started: Instant,
    deadline: Instant,
    interval: Duration,
    cancel: CancellationToken,
}

impl PollWindow {
    /// Returns what this window is watching.
    #[must_use]
    pub fn what(&self) -> &str {
        &self.what
    }

    /// Returns the time spent in this window so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Runs one observation, abandoning it if cancellation is requested.
    ///
    /// # Errors
    ///
    /// Returns the observation's error or [`PollError::Cancelled`].
    pub async fn observe<T, Fut>(&self, observation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.cancelled()),
            result = observation => result,
        }
    }

    /// Suspends until the next observation is due.
    ///
    /// The last sleep is shortened so one final observation happens at the
    /// deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Timeout`] if the deadline has passed, or
    /// [`PollError::Cancelled`] if cancellation is requested while sleeping.
    pub async fn wait_next(&self) -> Result<()> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(PollError::Timeout {
                what: self.what.clone(),
                waited_secs: self.elapsed().as_secs(),
            }
            .into());
        }

        let pause = self.interval.min(self.deadline - now);
        trace!("{} still pending, next check in {}ms", self.what, pause.as_millis());

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.cancelled()),
            () = tokio::time::sleep(pause) => Ok(()),
        }
    }

    fn cancelled(&self) -> crate::error::OvercloudError {
        PollError::Cancelled {
            what: self.what.clone(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, OvercloudError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_wait_ms: u64) -> PollSettings {
        PollSettings::new(Duration::from_millis(5), Duration::from_millis(max_wait_ms))
    }

    #[tokio::test]
    async fn test_until_returns_ready_value() {
        let poller = Poller::new(fast(1000), CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));

        let value = poller
            .until("counter", || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n >= 3 {
                        PollStep::Ready(n)
                    } else {
                        PollStep::Pending
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_until_times_out_without_fabricating_a_value() {
        let poller = Poller::new(fast(30), CancellationToken::new());

        let result: Result<u32> = poller
            .until("stuck stack", || async { Ok(PollStep::Pending) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("stuck stack"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_wait() {
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            PollSettings::new(Duration::from_secs(60), Duration::from_secs(600)),
            cancel.clone(),
        );

        let handle = tokio::spawn(async move {
            poller
                .until("stack", || async { Ok::<_, OvercloudError>(PollStep::<()>::Pending) })
                .await
        });
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Cancelled);
    }

    #[tokio::test]
    async fn test_observation_error_propagates() {
        let poller = Poller::new(fast(1000), CancellationToken::new());

        let result: Result<()> = poller
            .until("stack", || async { Err(OvercloudError::internal("boom")) })
            .await;

        assert_eq!(result.unwrap_err().kind(), FailureKind::Internal);
    }
}
