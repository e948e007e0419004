use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type TimerId = u64;

/// Work bound to a [`RegionTimer`]. Always invoked on the region thread.
pub trait TimerCallback: Send + Sync {
    /// Called each time the timer elapses.
    fn on_tick(&self, timer: &RegionTimer);

    /// Called after `on_tick` panicked. The timer is already stopped.
    fn on_fault(&self, _timer: &RegionTimer) {}
}

/// Outcome of one [`RegionScheduler::advance`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub timers_fired: usize,
    /// Panicking timer callbacks plus faults reported by callers since the
    /// previous advance.
    pub faults: usize,
}

#[derive(Debug)]
struct TimerState {
    alive: bool,
    interval_ms: u32,
    fire_at: u64,
    /// Bumped on every start/stop so queued entries of an older run are ignored.
    generation: u64,
    /// The heap holds an entry for the current generation.
    queued: bool,
}

impl TimerState {
    /// Invalidate the queued entry, if any, before a restart or stop.
    fn supersede(&mut self, shared: &SchedulerShared) {
        if self.queued {
            self.queued = false;
            shared.stale.fetch_add(1, AtomicOrdering::Relaxed);
        }
        self.generation += 1;
    }
}

struct TimerInner {
    id: TimerId,
    scheduler: Weak<SchedulerShared>,
    callback: Weak<dyn TimerCallback>,
    state: Mutex<TimerState>,
}

/// A restartable timer living on one region's clock.
///
/// A timer with a zero interval fires once per `start`; a timer with a
/// non-zero interval keeps firing every `interval` ms until stopped. The
/// interval may be changed from inside the callback and applies to the next
/// reschedule.
#[derive(Clone)]
pub struct RegionTimer {
    inner: Arc<TimerInner>,
}

impl RegionTimer {
    pub fn id(&self) -> TimerId {
        self.inner.id
    }

    /// Schedule the first fire `initial_delay_ms` from the region's current time.
    /// Restarting an alive timer discards its pending fire.
    pub fn start(&self, initial_delay_ms: u32) {
        let Some(shared) = self.inner.scheduler.upgrade() else {
            tracing::warn!(timer = self.inner.id, "timer started after its region was dropped");
            return;
        };
        let now = shared.queue.lock().now_ms;
        let delay = initial_delay_ms.max(1) as u64;
        let (fire_at, generation) = {
            let mut st = self.inner.state.lock();
            st.supersede(&shared);
            st.alive = true;
            st.queued = true;
            st.fire_at = now + delay;
            (st.fire_at, st.generation)
        };
        shared.push(fire_at, generation, self.inner.clone());
    }

    pub fn stop(&self) {
        let mut st = self.inner.state.lock();
        st.alive = false;
        match self.inner.scheduler.upgrade() {
            Some(shared) => st.supersede(&shared),
            None => st.generation += 1,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.state.lock().alive
    }

    pub fn interval(&self) -> u32 {
        self.inner.state.lock().interval_ms
    }

    pub fn set_interval(&self, interval_ms: u32) {
        self.inner.state.lock().interval_ms = interval_ms;
    }

    /// Milliseconds until the next fire, 0 if the timer is not running.
    pub fn time_until_elapsed(&self) -> u64 {
        let now = match self.inner.scheduler.upgrade() {
            Some(shared) => shared.queue.lock().now_ms,
            None => return 0,
        };
        let st = self.inner.state.lock();
        if !st.alive {
            return 0;
        }
        st.fire_at.saturating_sub(now)
    }
}

impl std::fmt::Debug for RegionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("RegionTimer")
            .field("id", &self.inner.id)
            .field("alive", &st.alive)
            .field("interval_ms", &st.interval_ms)
            .field("fire_at", &st.fire_at)
            .finish()
    }
}

struct QueueEntry {
    fire_at: u64,
    seq: u64,
    generation: u64,
    timer: Arc<TimerInner>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

#[derive(Default)]
struct TimerQueue {
    now_ms: u64,
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
    next_timer_id: TimerId,
}

/// Heap size below which stale entries are left for `advance` to discard.
const COMPACT_MIN_ENTRIES: usize = 64;

/// Lock order: the queue lock may be held while a timer state lock is taken,
/// never the reverse.
struct SchedulerShared {
    name: String,
    queue: Mutex<TimerQueue>,
    /// Heap entries of stopped or restarted timers.
    stale: AtomicUsize,
    reported_faults: AtomicUsize,
}

impl SchedulerShared {
    fn push(&self, fire_at: u64, generation: u64, timer: Arc<TimerInner>) {
        let mut q = self.queue.lock();
        let seq = q.next_seq;
        q.next_seq += 1;
        q.heap.push(Reverse(QueueEntry {
            fire_at,
            seq,
            generation,
            timer,
        }));
        if q.heap.len() >= COMPACT_MIN_ENTRIES && self.stale.load(AtomicOrdering::Relaxed) * 2 > q.heap.len() {
            self.compact(&mut q);
        }
    }

    /// Drop queued entries that can no longer fire.
    fn compact(&self, q: &mut TimerQueue) {
        let before = q.heap.len();
        q.heap.retain(|Reverse(entry)| {
            let st = entry.timer.state.lock();
            st.alive && st.generation == entry.generation
        });
        let dropped = before - q.heap.len();
        self.release_stale(dropped);
        tracing::trace!(region = %self.name, dropped, queued = q.heap.len(), "timer queue compacted");
    }

    fn release_stale(&self, count: usize) {
        // fetch_update with a closure that always returns Some cannot fail
        let _ = self
            .stale
            .fetch_update(AtomicOrdering::Relaxed, AtomicOrdering::Relaxed, |n| {
                Some(n.saturating_sub(count))
            });
    }
}

/// Per-region timer heap. Cloning yields another handle to the same clock.
#[derive(Clone)]
pub struct RegionScheduler {
    shared: Arc<SchedulerShared>,
}

impl RegionScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                name: name.into(),
                queue: Mutex::new(TimerQueue::default()),
                stale: AtomicUsize::new(0),
                reported_faults: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Region time in milliseconds since the scheduler was created.
    pub fn now_ms(&self) -> u64 {
        self.shared.queue.lock().now_ms
    }

    /// Timers waiting to fire. Entries of stopped or restarted timers that
    /// are still queued are not counted.
    pub fn pending_timers(&self) -> usize {
        let queued = self.shared.queue.lock().heap.len();
        queued.saturating_sub(self.shared.stale.load(AtomicOrdering::Relaxed))
    }

    #[cfg(test)]
    fn queued_entries(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// Count a fault caught outside a timer callback, e.g. by work running on
    /// a request thread. Reported by the next `advance`.
    pub fn report_fault(&self) {
        self.shared.reported_faults.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Create a stopped timer. The scheduler holds the callback weakly.
    pub fn create_timer(&self, callback: Weak<dyn TimerCallback>) -> RegionTimer {
        let id = {
            let mut q = self.shared.queue.lock();
            q.next_timer_id += 1;
            q.next_timer_id
        };
        RegionTimer {
            inner: Arc::new(TimerInner {
                id,
                scheduler: Arc::downgrade(&self.shared),
                callback,
                state: Mutex::new(TimerState {
                    alive: false,
                    interval_ms: 0,
                    fire_at: 0,
                    generation: 0,
                    queued: false,
                }),
            }),
        }
    }

    /// Move the clock forward by `elapsed_ms`, firing every timer due on the way.
    ///
    /// The clock reads each entry's fire time while its callback runs. The
    /// queue lock is released around callbacks so they may start and stop timers.
    pub fn advance(&self, elapsed_ms: u64) -> TickReport {
        let target = self.now_ms() + elapsed_ms;
        let mut report = TickReport::default();

        while let Some(entry) = self.pop_due(target) {
            let timer = RegionTimer {
                inner: entry.timer.clone(),
            };
            {
                let mut st = timer.inner.state.lock();
                if !st.alive || st.generation != entry.generation {
                    self.shared.release_stale(1);
                    continue;
                }
                st.queued = false;
            }
            let Some(callback) = timer.inner.callback.upgrade() else {
                timer.stop();
                continue;
            };

            report.timers_fired += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.on_tick(&timer)));
            if outcome.is_err() {
                report.faults += 1;
                timer.stop();
                tracing::error!(
                    region = %self.shared.name,
                    timer = timer.id(),
                    at_ms = entry.fire_at,
                    "timer callback panicked, timer stopped"
                );
                if panic::catch_unwind(AssertUnwindSafe(|| callback.on_fault(&timer))).is_err() {
                    tracing::error!(region = %self.shared.name, timer = timer.id(), "fault handler panicked");
                }
                continue;
            }

            let reschedule = {
                let mut st = timer.inner.state.lock();
                if st.alive && st.generation == entry.generation {
                    if st.interval_ms > 0 {
                        st.fire_at = entry.fire_at + st.interval_ms as u64;
                        st.queued = true;
                        Some((st.fire_at, st.generation))
                    } else {
                        st.alive = false;
                        None
                    }
                } else {
                    None
                }
            };
            if let Some((fire_at, generation)) = reschedule {
                self.shared.push(fire_at, generation, entry.timer);
            }
        }

        report.faults += self.shared.reported_faults.swap(0, AtomicOrdering::Relaxed);
        report
    }

    fn pop_due(&self, target: u64) -> Option<QueueEntry> {
        let mut q = self.shared.queue.lock();
        let due = matches!(q.heap.peek(), Some(Reverse(e)) if e.fire_at <= target);
        if !due {
            q.now_ms = q.now_ms.max(target);
            return None;
        }
        let Reverse(entry) = q.heap.pop()?;
        q.now_ms = q.now_ms.max(entry.fire_at);
        Some(entry)
    }
}

impl std::fmt::Debug for RegionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let q = self.shared.queue.lock();
        f.debug_struct("RegionScheduler")
            .field("name", &self.shared.name)
            .field("now_ms", &q.now_ms)
            .field("queued", &q.heap.len())
            .field("stale", &self.shared.stale.load(AtomicOrdering::Relaxed))
            .finish()
    }
}
