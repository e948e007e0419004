use std::time::{Duration, Instant};

use observability::RegionTickMetrics;

use crate::timer::RegionScheduler;

/// Region clock configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ticks per second.
    pub tps: u32,
    /// Maximum ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tps: 10,
            max_ticks: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tps.max(1) as f64)
    }

    /// Region time advanced per tick.
    pub fn tick_ms(&self) -> u64 {
        (1000 / self.tps.max(1) as u64).max(1)
    }
}

/// Drives one region's scheduler at a fixed tick rate.
pub struct RegionLoop {
    pub scheduler: RegionScheduler,
    pub config: SchedulerConfig,
    pub current_tick: u64,
}

impl RegionLoop {
    pub fn new(config: SchedulerConfig, name: impl Into<String>) -> Self {
        Self {
            scheduler: RegionScheduler::new(name),
            config,
            current_tick: 0,
        }
    }

    /// Advance region time by one tick and fire everything due.
    pub fn step(&mut self) -> RegionTickMetrics {
        let start = Instant::now();
        let report = self.scheduler.advance(self.config.tick_ms());
        self.current_tick += 1;

        RegionTickMetrics {
            tick_number: self.current_tick,
            duration_us: start.elapsed().as_micros(),
            timers_fired: report.timers_fired,
            handler_faults: report.faults,
            pending_timers: self.scheduler.pending_timers(),
        }
    }

    /// Run until `max_ticks` is reached.
    pub fn run(&mut self) -> Vec<RegionTickMetrics> {
        let mut all_metrics = Vec::new();
        self.run_until(|metrics| {
            all_metrics.push(metrics.clone());
            false
        });
        all_metrics
    }

    /// Run at the configured rate until `should_stop` returns true or
    /// `max_ticks` is reached. Returns the number of ticks executed.
    pub fn run_until(&mut self, mut should_stop: impl FnMut(&RegionTickMetrics) -> bool) -> u64 {
        let tick_duration = self.config.tick_duration();
        let first_tick = self.current_tick;

        loop {
            if self.config.max_ticks > 0 && self.current_tick >= self.config.max_ticks {
                break;
            }

            let tick_start = Instant::now();
            let metrics = self.step();
            metrics.log();
            if should_stop(&metrics) {
                break;
            }

            // Sleep until next tick
            let elapsed = tick_start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            }
        }

        self.current_tick - first_tick
    }
}
