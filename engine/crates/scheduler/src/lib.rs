//! Cooperative, single-threaded clock for one simulation region.
//!
//! All timer callbacks of a region run on the thread that calls
//! [`RegionScheduler::advance`], in `(fire time, schedule order)` order.
//! Other threads may start and stop timers at any time.

pub mod region;
pub mod timer;

pub use region::{RegionLoop, SchedulerConfig};
pub use timer::{RegionScheduler, RegionTimer, TickReport, TimerCallback, TimerId};
