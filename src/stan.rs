//! System Trace Audit Number generation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Upper bound of the STAN range; the counter wraps back to 1 past it.
const STAN_MAX: u32 = 999_999;

/// Monotonic STAN counter over `[1, 999999]` with wraparound.
///
/// Field 11 is six decimal digits, so the usable range is fixed by the
/// protocol. Wraparound is harmless as long as fewer than a million
/// requests are in flight at once; the registry additionally refuses to
/// reuse a STAN that still has a live waiter.
#[derive(Debug, Default)]
pub(crate) struct StanSequence {
    counter: AtomicU32,
}

impl StanSequence {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Next STAN, rendered as a zero-padded six-digit string.
    pub(crate) fn next(&self) -> String {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            let next = current % STAN_MAX + 1;
            match self.counter.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format!("{next:06}"),
                Err(observed) => current = observed,
            }
        }
    }
}
