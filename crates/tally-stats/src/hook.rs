//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Side channel invoked for every recorded timing."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::timings::Timings;

/// Receives every observation recorded by a named [`Timings`].
///
/// Hooks run synchronously on the recording thread. Implementations must
/// return quickly and must not panic.
pub trait TimerHook: Send + Sync {
    fn record_timing(&self, name: &str, category: &str, elapsed_ms: i64, source: &Timings);
}

impl<F> TimerHook for F
where
    F: Fn(&str, &str, i64, &Timings) + Send + Sync,
{
    fn record_timing(&self, name: &str, category: &str, elapsed_ms: i64, source: &Timings) {
        self(name, category, elapsed_ms, source)
    }
}

pub type SharedTimerHook = Arc<dyn TimerHook>;

/// Logs observations at or above a threshold.
#[derive(Debug, Clone)]
pub struct SlowTimingLogger {
    threshold_ms: i64,
}

impl SlowTimingLogger {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold_ms: i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn is_slow(&self, elapsed_ms: i64) -> bool {
        elapsed_ms >= self.threshold_ms
    }
}

impl TimerHook for SlowTimingLogger {
    fn record_timing(&self, name: &str, category: &str, elapsed_ms: i64, source: &Timings) {
        if self.is_slow(elapsed_ms) {
            warn!(
                variable = name,
                label = source.label(),
                category,
                elapsed_ms,
                threshold_ms = self.threshold_ms,
                "slow timing observed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let logger = SlowTimingLogger::new(Duration::from_millis(100));
        assert!(!logger.is_slow(99));
        assert!(logger.is_slow(100));
        assert!(logger.is_slow(5_000));
    }
}
