//! Background wall-clock timer service.
//!
//! A single thread sleeps on a condition variable until the earliest pending
//! deadline, runs every expired callback with the lock released, and goes
//! back to sleep. The thread is spawned on the first registration and exits
//! when the owning [`TimerThread`] is dropped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::driver::{TimeSource, TimerService, WallClock};
use super::queue::{fire_all, TimerCallback, TimerHandle, TimerQueue};
use crate::config::TimerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, trace};
use crate::types::Time;

/// Wall-clock timer service backed by a dedicated thread.
#[derive(Debug)]
pub struct TimerThread {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

#[derive(Debug)]
struct Shared {
    clock: WallClock,
    state: Mutex<State>,
    cvar: Condvar,
}

#[derive(Debug)]
struct State {
    queue: TimerQueue,
    shutdown: bool,
}

impl TimerThread {
    /// Creates the service. No thread is started until a timer is scheduled.
    #[must_use]
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock: WallClock::new(),
                state: Mutex::new(State {
                    queue: TimerQueue::new(config.capacity),
                    shutdown: false,
                }),
                cvar: Condvar::new(),
            }),
            worker: Mutex::new(None),
            thread_name: config.thread_name.clone(),
        }
    }

    /// Returns true once the background thread has been started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    fn ensure_started(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run(&shared))
            .map_err(|err| {
                Error::new(ErrorKind::TimerUnavailable)
                    .with_message("failed to spawn timer thread")
                    .with_source(err)
            })?;
        debug!(thread = %self.thread_name, "timer thread started");
        *worker = Some(handle);
        Ok(())
    }
}

impl TimerService for TimerThread {
    fn now(&self) -> Time {
        self.shared.clock.now()
    }

    fn schedule(&self, deadline: Time, callback: TimerCallback) -> Result<TimerHandle> {
        self.ensure_started()?;
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Error::new(ErrorKind::TimerUnavailable).with_message("timer thread stopped"));
        }
        let earliest = state.queue.next_deadline();
        let handle = state.queue.insert(deadline, callback)?;
        if earliest.map_or(true, |current| deadline < current) {
            self.shared.cvar.notify_one();
        }
        trace!(timer = handle.id(), deadline = %deadline, "timer scheduled");
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let removed = self.shared.state.lock().queue.remove(handle);
        removed.is_some()
    }

    fn pending_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.cvar.notify_all();

        if let Some(handle) = self.worker.get_mut().take() {
            // The last handle can be released by a callback running on the
            // timer thread itself; that thread exits on its own.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }

        let now = shared.clock.now();
        let expired = state.queue.collect_expired(now);
        if !expired.is_empty() {
            MutexGuard::unlocked(&mut state, || {
                let fired = fire_all(expired);
                trace!(fired, "timers fired");
            });
            continue;
        }

        match state.queue.next_deadline() {
            Some(next) => {
                let _ = shared.cvar.wait_for(&mut state, next.remaining_from(now));
            }
            None => shared.cvar.wait(&mut state),
        }
    }

    let pending = state.queue.drain();
    drop(state);
    drop(pending);
    debug!("timer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn thread_starts_lazily() {
        let timer = TimerThread::new(&TimerConfig::default());
        assert!(!timer.is_running());
        timer
            .schedule(timer.now() + Duration::from_secs(60), Box::new(|| {}))
            .unwrap();
        assert!(timer.is_running());
        assert_eq!(timer.pending_count(), 1);
    }

    #[test]
    fn fires_after_deadline() {
        let timer = TimerThread::new(&TimerConfig::default());
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        timer
            .schedule(
                timer.now() + Duration::from_millis(20),
                Box::new(move || {
                    let _ = tx.send(Instant::now());
                }),
            )
            .unwrap();

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(start) >= Duration::from_millis(20));
    }

    #[test]
    fn earlier_registration_wakes_the_thread() {
        let timer = TimerThread::new(&TimerConfig::default());
        timer
            .schedule(timer.now() + Duration::from_secs(60), Box::new(|| {}))
            .unwrap();

        let (tx, rx) = mpsc::channel();
        timer
            .schedule(
                timer.now() + Duration::from_millis(5),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(timer.pending_count(), 1);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let timer = TimerThread::new(&TimerConfig::default());
        let (tx, rx) = mpsc::channel::<()>();
        let handle = timer
            .schedule(
                timer.now() + Duration::from_millis(20),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .unwrap();
        assert!(timer.cancel(handle));
        // The sender is dropped with the cancelled callback.
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn capacity_exhaustion_is_reported() {
        let config = TimerConfig::default().with_capacity(1);
        let timer = TimerThread::new(&config);
        let far = timer.now() + Duration::from_secs(60);
        timer.schedule(far, Box::new(|| {})).unwrap();
        let err = timer.schedule(far, Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimerExhausted);
    }

    #[test]
    fn drop_stops_the_thread() {
        let timer = TimerThread::new(&TimerConfig::default());
        timer
            .schedule(timer.now() + Duration::from_secs(60), Box::new(|| {}))
            .unwrap();
        // Joins the worker; hanging here would fail the test by timeout.
        drop(timer);
    }
}
