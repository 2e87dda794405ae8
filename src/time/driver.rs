//! Time sources and the timer service abstraction.
//!
//! Deadline enforcement goes through a [`TimerService`]: something that can
//! tell the time and run a callback once a deadline passes. Two services are
//! provided:
//!
//! - [`TimerDriver`]: fires timers only when [`TimerDriver::process_timers`]
//!   is called. With a [`VirtualClock`] this gives fully deterministic tests.
//! - [`TimerThread`](super::TimerThread): a background thread on the wall
//!   clock, used by [`Context::root`](crate::Context::root).
//!
//! Contexts hold the service through a cloneable [`TimerDriverHandle`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use super::queue::{fire_all, TimerCallback, TimerHandle, TimerQueue};
use super::thread::TimerThread;
use crate::config::{ConfigLoader, TimerConfig};
use crate::error::Result;
use crate::tracing_compat::warn;
use crate::types::Time;

/// Time source abstraction for getting the current time.
///
/// This trait allows the timer driver to work with both wall clock time
/// (production) and virtual time (testing).
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Wall clock time source for production use.
///
/// Uses `std::time::Instant` internally, converting to our `Time` type.
/// The epoch is the time when this source was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let elapsed = self.epoch.elapsed();
        Time::from_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// Virtual time source for testing.
///
/// Time only advances when explicitly told to do so.
///
/// # Example
///
/// ```
/// use kie_context::time::{TimeSource, VirtualClock};
/// use kie_context::types::Time;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(1_000_000_000); // 1 second
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by the given number of nanoseconds.
    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, Ordering::Release);
    }

    /// Advances time to the given absolute time.
    ///
    /// If the target time is in the past, this is a no-op.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}

/// A service that runs one-shot callbacks at deadlines.
///
/// Implementations must be safe to call from any thread, including from
/// inside a callback they are currently running.
pub trait TimerService: Send + Sync + fmt::Debug {
    /// Returns the current time on the service's clock.
    fn now(&self) -> Time;

    /// Schedules `callback` to run once `deadline` has passed.
    ///
    /// Fails with `ErrorKind::TimerExhausted` when the service is at capacity
    /// and `ErrorKind::TimerUnavailable` when it cannot run timers at all.
    fn schedule(&self, deadline: Time, callback: TimerCallback) -> Result<TimerHandle>;

    /// Cancels a pending timer. Returns true if it had not fired yet.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Returns the number of pending timers.
    fn pending_count(&self) -> usize;
}

/// Timer service that fires only when told to.
///
/// # Example
///
/// ```
/// use kie_context::time::TimerDriver;
/// use std::time::Duration;
///
/// let driver = TimerDriver::new();
/// // Register deadlines through contexts, then:
/// let fired = driver.advance(Duration::from_millis(50));
/// assert_eq!(fired, 0);
/// ```
#[derive(Debug)]
pub struct TimerDriver<T: TimeSource = VirtualClock> {
    clock: Arc<T>,
    queue: Mutex<TimerQueue>,
}

impl<T: TimeSource> TimerDriver<T> {
    /// Creates a new timer driver with the given time source.
    #[must_use]
    pub fn with_clock(clock: Arc<T>) -> Self {
        Self::with_clock_and_capacity(clock, TimerConfig::default().capacity)
    }

    /// Creates a driver that accepts at most `capacity` pending timers.
    #[must_use]
    pub fn with_clock_and_capacity(clock: Arc<T>, capacity: usize) -> Self {
        Self {
            clock,
            queue: Mutex::new(TimerQueue::new(capacity)),
        }
    }

    /// Returns the underlying clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<T> {
        &self.clock
    }

    /// Returns the current time from the underlying clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Runs every timer whose deadline has passed.
    ///
    /// Callbacks run on the calling thread after the queue lock is released,
    /// so they may schedule or cancel timers themselves. Returns the number
    /// of timers fired.
    pub fn process_timers(&self) -> usize {
        let now = self.clock.now();
        let expired = self.queue.lock().collect_expired(now);
        fire_all(expired)
    }

    /// Returns the next deadline that will fire, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.queue.lock().next_deadline()
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if there are no pending timers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Drops all pending timers without firing them.
    pub fn clear(&self) {
        let pending = self.queue.lock().drain();
        drop(pending);
    }
}

impl TimerDriver<VirtualClock> {
    /// Creates a new timer driver with a virtual clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(VirtualClock::new()))
    }

    /// Advances the virtual clock and fires everything that became due.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock
            .advance(u64::try_from(by.as_nanos()).unwrap_or(u64::MAX));
        self.process_timers()
    }

    /// Moves the virtual clock to `time` (never backwards) and fires due timers.
    pub fn advance_to(&self, time: Time) -> usize {
        self.clock.advance_to(time);
        self.process_timers()
    }
}

impl Default for TimerDriver<VirtualClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource + fmt::Debug + 'static> TimerService for TimerDriver<T> {
    fn now(&self) -> Time {
        Self::now(self)
    }

    fn schedule(&self, deadline: Time, callback: TimerCallback) -> Result<TimerHandle> {
        self.queue.lock().insert(deadline, callback)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let removed = self.queue.lock().remove(handle);
        removed.is_some()
    }

    fn pending_count(&self) -> usize {
        Self::pending_count(self)
    }
}

static GLOBAL_TIMER: OnceLock<TimerDriverHandle> = OnceLock::new();

/// Shared handle to a timer service.
///
/// Cloning is cheap; all clones refer to the same service.
#[derive(Clone)]
pub struct TimerDriverHandle {
    inner: Arc<dyn TimerService>,
}

impl fmt::Debug for TimerDriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriverHandle")
            .field("pending_count", &self.inner.pending_count())
            .finish()
    }
}

impl TimerDriverHandle {
    /// Creates a new handle wrapping the given timer service.
    pub fn new<S: TimerService + 'static>(service: Arc<S>) -> Self {
        Self { inner: service }
    }

    /// Creates a handle backed by a dedicated wall-clock timer thread.
    ///
    /// The thread starts on the first registration and stops once every
    /// handle to it has been dropped.
    #[must_use]
    pub fn wall_clock(config: &TimerConfig) -> Self {
        Self::new(Arc::new(TimerThread::new(config)))
    }

    /// Returns the process-wide wall-clock timer service.
    ///
    /// Its settings come from [`ConfigLoader`]; an invalid environment falls
    /// back to the defaults.
    #[must_use]
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub fn global() -> Self {
        GLOBAL_TIMER
            .get_or_init(|| {
                let config = ConfigLoader::new().load().unwrap_or_else(|err| {
                    warn!(error = %err, "invalid context config, using defaults");
                    crate::config::ContextConfig::default()
                });
                Self::wall_clock(&config.timer)
            })
            .clone()
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.now()
    }

    /// Schedules a one-shot callback.
    pub fn schedule(&self, deadline: Time, callback: TimerCallback) -> Result<TimerHandle> {
        self.inner.schedule(deadline, callback)
    }

    /// Cancels a pending timer.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.inner.cancel(handle)
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }

    /// Returns true if both handles refer to the same service.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn virtual_clock_never_moves_backwards() {
        let clock = VirtualClock::starting_at(Time::from_secs(5));
        clock.advance_to(Time::from_secs(1));
        assert_eq!(clock.now(), Time::from_secs(5));
        clock.advance_to(Time::from_secs(7));
        assert_eq!(clock.now(), Time::from_secs(7));
    }

    #[test]
    fn wall_clock_advances() {
        let clock = WallClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > t1);
    }

    #[test]
    fn driver_fires_only_due_timers() {
        let driver = TimerDriver::new();
        let fired = Arc::new(AtomicUsize::new(0));
        driver
            .schedule(Time::from_millis(10), counting(&fired))
            .unwrap();
        driver
            .schedule(Time::from_millis(20), counting(&fired))
            .unwrap();

        assert_eq!(driver.advance(Duration::from_millis(5)), 0);
        assert_eq!(driver.advance(Duration::from_millis(5)), 1);
        assert_eq!(driver.next_deadline(), Some(Time::from_millis(20)));
        assert_eq!(driver.advance_to(Time::from_secs(1)), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(driver.is_empty());
    }

    #[test]
    fn cancelled_timer_is_defused() {
        let driver = TimerDriver::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = driver
            .schedule(Time::from_millis(10), counting(&fired))
            .unwrap();
        assert!(TimerService::cancel(&driver, handle));
        assert!(!TimerService::cancel(&driver, handle));
        driver.advance(Duration::from_secs(1));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_may_reenter_the_driver() {
        let driver = Arc::new(TimerDriver::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let inner_driver = Arc::clone(&driver);
        let inner_fired = Arc::clone(&fired);
        driver
            .schedule(
                Time::from_millis(1),
                Box::new(move || {
                    inner_driver
                        .schedule(Time::from_millis(2), counting(&inner_fired))
                        .unwrap();
                }),
            )
            .unwrap();

        driver.advance(Duration::from_millis(1));
        assert_eq!(driver.pending_count(), 1);
        driver.advance(Duration::from_millis(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_drops_without_firing() {
        let driver = TimerDriver::new();
        let fired = Arc::new(AtomicUsize::new(0));
        driver.schedule(Time::from_millis(1), counting(&fired)).unwrap();
        driver.clear();
        driver.advance(Duration::from_secs(1));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_delegates_to_service() {
        let driver = Arc::new(TimerDriver::new());
        let handle = TimerDriverHandle::new(Arc::clone(&driver));
        let other = handle.clone();
        assert!(handle.ptr_eq(&other));
        assert_eq!(handle.now(), Time::ZERO);

        let timer = handle.schedule(Time::from_millis(3), Box::new(|| {})).unwrap();
        assert_eq!(other.pending_count(), 1);
        assert!(handle.cancel(timer));
        assert_eq!(driver.pending_count(), 0);
    }

    #[test]
    fn global_handle_is_shared() {
        assert!(TimerDriverHandle::global().ptr_eq(&TimerDriverHandle::global()));
    }
}
