//! Suspension primitives.
//!
//! The pipeline blocks in exactly two ways, named so tests can simulate
//! both without wall-clock delays:
//!
//! * [`WaitPolicy::Bounded`]: automatic waits (backend processing, UI
//!   post-conditions) with a hard deadline.
//! * [`WaitPolicy::Manual`]: the interactive-login wait. Polls forever;
//!   a human is the completion signal, so no timeout applies by design.
//!
//! Short settle delays after navigation are separate: the target page
//! offers no reliable ready signal, so those are fixed sleeps with jitter.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;

use super::AutomationError;

#[derive(Debug, Clone, Copy)]
pub enum WaitPolicy {
    /// Poll `interval` until the probe passes, up to `timeout`.
    Bounded { timeout: Duration, interval: Duration },
    /// Poll `interval` until the probe passes, indefinitely.
    Manual { interval: Duration },
}

#[derive(Debug)]
pub enum WaitError {
    TimedOut { waited: Duration },
    Probe(AutomationError),
}

/// Poll an async predicate under a policy. Returns the time waited on
/// success. Probe errors propagate immediately: a dead driver is a real
/// failure, not something more polling fixes.
pub async fn wait_until<F, Fut>(policy: WaitPolicy, mut probe: F) -> Result<Duration, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, AutomationError>>,
{
    let start = tokio::time::Instant::now();
    let (deadline, interval) = match policy {
        WaitPolicy::Bounded { timeout, interval } => (Some(start + timeout), interval),
        WaitPolicy::Manual { interval } => (None, interval),
    };

    loop {
        if probe().await.map_err(WaitError::Probe)? {
            return Ok(start.elapsed());
        }
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() + interval > deadline {
                return Err(WaitError::TimedOut {
                    waited: start.elapsed(),
                });
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Fixed UI-settle delay with a little jitter so consecutive clicks do not
/// land on a metronome.
pub async fn settle(base: Duration) {
    let jitter = {
        let mut rng = rand::rng();
        rng.random_range(0..250u64)
    };
    tokio::time::sleep(base + Duration::from_millis(jitter)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_times_out() {
        let polls = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let result = wait_until(
            WaitPolicy::Bounded {
                timeout: Duration::from_secs(10),
                interval: Duration::from_secs(1),
            },
            move || {
                p.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            },
        )
        .await;
        match result {
            Err(WaitError::TimedOut { waited }) => {
                assert!(waited >= Duration::from_secs(9));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(polls.load(Ordering::SeqCst) >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_passes_when_probe_turns_true() {
        let polls = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let waited = wait_until(
            WaitPolicy::Bounded {
                timeout: Duration::from_secs(60),
                interval: Duration::from_secs(1),
            },
            move || {
                let n = p.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n >= 3) }
            },
        )
        .await
        .expect("probe passes on fourth poll");
        assert!(waited >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_wait_has_no_deadline() {
        // A manual wait outlasting any bounded timeout is the whole point;
        // simulate a human arriving after an hour.
        let polls = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let waited = wait_until(
            WaitPolicy::Manual {
                interval: Duration::from_secs(5),
            },
            move || {
                let n = p.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n >= 720) }
            },
        )
        .await
        .expect("manual wait never times out");
        assert!(waited >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_propagates() {
        let result = wait_until(
            WaitPolicy::Bounded {
                timeout: Duration::from_secs(10),
                interval: Duration::from_secs(1),
            },
            || async { Err(AutomationError::Driver("gone".into())) },
        )
        .await;
        assert!(matches!(result, Err(WaitError::Probe(_))));
    }
}
