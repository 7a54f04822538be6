//! Cooperative polling.
//!
//! Waiting never parks inside firmware: events are checked, and between
//! checks the caller's yield hook runs. A [`Budget`] bounds the number of
//! checks; running out is a `TIMEOUT`.

use crate::status::{EfiError, ErrorKind, Result, Status};
use crate::table::{BootServices, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Unbounded,
    /// At most this many checks.
    Polls(usize),
}

impl Budget {
    /// Consume one check. `false` once the budget is spent.
    fn take(&mut self) -> bool {
        match self {
            Budget::Unbounded => true,
            Budget::Polls(0) => false,
            Budget::Polls(n) => {
                *n -= 1;
                true
            }
        }
    }
}

/// Retry `attempt` until it yields a value, running `yield_now` between
/// attempts. `NOT_READY` from `attempt` also counts as "not yet".
pub fn poll_until<T>(
    mut budget: Budget,
    mut attempt: impl FnMut() -> Result<Option<T>>,
    mut yield_now: impl FnMut(),
) -> Result<T> {
    while budget.take() {
        match attempt() {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) if err.kind() == ErrorKind::NotReady => {}
            Err(err) => return Err(err),
        }
        yield_now();
    }
    Err(EfiError::new(Status::TIMEOUT))
}

/// Wait for `event` to be signalled.
pub fn wait_for_event(
    bs: &BootServices,
    event: Event,
    budget: Budget,
    yield_now: impl FnMut(),
) -> Result<()> {
    poll_until(
        budget,
        || bs.check_event(event).map(|signalled| signalled.then_some(())),
        yield_now,
    )
}

/// Default yield hook: a short firmware stall, falling back to a spin hint.
pub fn stall_yield(bs: &BootServices) -> impl FnMut() + '_ {
    move || {
        if bs.stall(1_000).is_err() {
            core::hint::spin_loop();
        }
    }
}
