use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Per-tick measurements of one region scheduler.
#[derive(Debug, Clone)]
pub struct RegionTickMetrics {
    pub tick_number: u64,
    pub duration_us: u128,
    /// Pulse/expire timers fired during the tick.
    pub timers_fired: usize,
    /// Effect handlers that failed or panicked since the previous tick, on
    /// any thread, plus timer callbacks that panicked.
    pub handler_faults: usize,
    pub pending_timers: usize,
}

impl RegionTickMetrics {
    pub const TICK_BUDGET_US: u128 = 33_000;

    pub fn over_budget(&self) -> bool {
        self.duration_us > Self::TICK_BUDGET_US
    }

    pub fn log(&self) {
        if self.handler_faults > 0 {
            tracing::error!(
                tick = self.tick_number,
                faults = self.handler_faults,
                timers = self.timers_fired,
                "effect callbacks faulted during tick"
            );
        }
        if self.over_budget() {
            tracing::warn!(
                tick = self.tick_number,
                duration_us = self.duration_us,
                timers = self.timers_fired,
                pending = self.pending_timers,
                "tick exceeded budget ({}us > {}us)",
                self.duration_us,
                Self::TICK_BUDGET_US
            );
        } else {
            tracing::debug!(
                tick = self.tick_number,
                duration_us = self.duration_us,
                timers = self.timers_fired,
                pending = self.pending_timers,
                "tick completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_check() {
        let mut m = RegionTickMetrics {
            tick_number: 1,
            duration_us: 1_000,
            timers_fired: 3,
            handler_faults: 0,
            pending_timers: 10,
        };
        assert!(!m.over_budget());
        m.duration_us = 40_000;
        assert!(m.over_budget());
    }
}
