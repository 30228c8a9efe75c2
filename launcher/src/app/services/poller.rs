// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Answer of a single check.
#[derive(Debug)]
pub enum PollResult<T, E> {
    Ready(T),
    NotReady,
    Fatal(E),
}

/// How a polling loop ended. Every exit is named; there is no silent give-up.
#[derive(Debug)]
pub enum PollOutcome<T, E> {
    Ready(T),
    Fatal(E),
    Timeout { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Delay schedule with a hard attempt budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    /// `base * 2^(0.5 * n)` after the (n+1)-th check, clamped to `max_delay`.
    Exponential {
        base: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
    Fixed { delay: Duration, max_attempts: u32 },
}

impl Schedule {
    pub fn exponential(max_attempts: u32, max_delay: Duration) -> Self {
        Schedule::Exponential {
            base: Duration::from_secs(1),
            max_delay,
            max_attempts,
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Schedule::Fixed {
            delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match *self {
            Schedule::Exponential { max_attempts, .. } | Schedule::Fixed { max_attempts, .. } => {
                max_attempts.max(1)
            }
        }
    }

    /// Sleep that follows the `attempt`-th check (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Schedule::Fixed { delay, .. } => delay,
            Schedule::Exponential {
                base, max_delay, ..
            } => {
                let exponent = 0.5 * f64::from(attempt.saturating_sub(1));
                let secs = base.as_secs_f64() * exponent.exp2();
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// A receiver that never reports cancellation.
pub fn never_cancelled() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

pub fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Sleeps for `delay` unless cancellation arrives first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if is_cancelled(cancel) {
        return false;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Sender gone: nobody can cancel any more.
                    (&mut sleep).await;
                    return true;
                }
                if *cancel.borrow_and_update() {
                    return false;
                }
            }
        }
    }
}

/// Calls `check` until it is ready, fails fatally, the schedule's attempt
/// budget runs out, or the caller cancels. `check` receives the 1-based
/// attempt number. No sleep follows the last attempt.
pub async fn poll<T, E, F, Fut>(
    schedule: &Schedule,
    cancel: &mut watch::Receiver<bool>,
    mut check: F,
) -> PollOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollResult<T, E>>,
{
    let max_attempts = schedule.max_attempts();
    let mut attempt = 0;
    loop {
        if is_cancelled(cancel) {
            return PollOutcome::Cancelled { attempts: attempt };
        }
        attempt += 1;
        match check(attempt).await {
            PollResult::Ready(value) => return PollOutcome::Ready(value),
            PollResult::Fatal(err) => return PollOutcome::Fatal(err),
            PollResult::NotReady => {}
        }
        if attempt >= max_attempts {
            return PollOutcome::Timeout { attempts: attempt };
        }
        if !sleep_or_cancel(schedule.delay_after(attempt), cancel).await {
            return PollOutcome::Cancelled { attempts: attempt };
        }
    }
}
