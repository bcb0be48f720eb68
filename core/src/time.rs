// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Wall-clock-free time. Everything in the engine is stamped with
//! nanoseconds from a process-wide monotonic epoch, so subtraction is always
//! meaningful and never goes backward.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds since the first call into this module.
pub fn now_nanos() -> i64 {
    EPOCH.elapsed().as_nanos() as i64
}

pub fn nanos_to_seconds(elapsed: i64) -> f64 {
    elapsed as f64 / 1_000_000_000.0
}

pub fn nanos_to_millis(elapsed: i64) -> f64 {
    elapsed as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_le;

    #[test]
    fn monotonic() {
        let a = now_nanos();
        let b = now_nanos();
        assert_le!(a, b);
    }

    #[test]
    fn conversions() {
        assert_eq!(nanos_to_seconds(1_500_000_000), 1.5);
        assert_eq!(nanos_to_millis(1_500_000), 1.5);
    }
}
