//! Bounded polling until success, deadline, or cancellation.
//!
//! Observers use this to wait for eventual convergence: a probe is invoked
//! immediately and then once per `interval` until it succeeds or the deadline
//! future resolves. On deadline every probe error is handed back, so callers
//! can see why convergence never happened.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use kim::poll::poll_for;
//!
//! let sa = poll_for(Duration::from_secs(120), Duration::from_secs(1), || async {
//!     service_accounts.get("alice").await
//! })
//! .await?;
//! ```
//!
//! The deadline and cancellation paths produce the same [`PollTimeout`]; a
//! caller that cancels cannot tell the two apart from the result.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Returned when polling ends without a successful probe.
///
/// Carries every probe error in the order they were observed.
#[derive(Debug)]
pub struct PollTimeout<E> {
    /// Errors from each failed attempt, oldest first
    pub errors: Vec<E>,
}

impl<E> PollTimeout<E> {
    /// Number of failed attempts
    pub fn attempts(&self) -> usize {
        self.errors.len()
    }

    /// Consume the timeout and return the collected errors
    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }
}

impl<E: fmt::Display> fmt::Display for PollTimeout<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("poller timed out: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// The most recent probe error is exposed as the source.
impl<E: std::error::Error + 'static> std::error::Error for PollTimeout<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .last()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Invoke `probe` until it succeeds or `deadline` resolves.
///
/// The first attempt runs immediately. After a failure the next attempt waits
/// a full `interval` measured from the end of the previous attempt, so slow
/// probes never overlap. `deadline` is only observed between attempts; probes
/// should bound their own duration.
pub async fn poll_until<R, E, F, Fut, D>(
    deadline: D,
    interval: Duration,
    mut probe: F,
) -> Result<R, PollTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    D: Future<Output = ()>,
    E: fmt::Display,
{
    let mut errors = Vec::new();

    match probe().await {
        Ok(value) => return Ok(value),
        Err(e) => {
            trace!(attempt = 1, error = %e, "probe failed");
            errors.push(e);
        }
    }

    tokio::pin!(deadline);
    let timer = tokio::time::sleep(interval);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;

            () = &mut deadline => {
                return Err(PollTimeout { errors });
            }
            () = &mut timer => {
                match probe().await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        trace!(attempt = errors.len() + 1, error = %e, "probe failed");
                        errors.push(e);
                    }
                }
                timer.as_mut().reset(Instant::now() + interval);
            }
        }
    }
}

/// [`poll_until`] for probes that produce no value.
pub async fn poll<E, F, Fut, D>(
    deadline: D,
    interval: Duration,
    probe: F,
) -> Result<(), PollTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    D: Future<Output = ()>,
    E: fmt::Display,
{
    poll_until(deadline, interval, probe).await
}

/// [`poll_until`] with a deadline `timeout` from now.
pub async fn poll_for<R, E, F, Fut>(
    timeout: Duration,
    interval: Duration,
    probe: F,
) -> Result<R, PollTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: fmt::Display,
{
    poll_until(tokio::time::sleep(timeout), interval, probe).await
}

/// [`poll_until`] that stops when `token` is cancelled.
pub async fn poll_until_cancelled<R, E, F, Fut>(
    token: &CancellationToken,
    interval: Duration,
    probe: F,
) -> Result<R, PollTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: fmt::Display,
{
    poll_until(token.cancelled(), interval, probe).await
}
