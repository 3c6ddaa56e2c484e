//! Deadlines that interrupt a suspended task when they expire.

use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::metrics::DEADLINES_FIRED;
use crate::{DeadlineExpired, DeadlineId, Hub, TaskId, TimerKey};

/// A timer that, on expiry, delivers a [`DeadlineExpired`] signal into the suspension point of
/// one specific task.
///
/// The signal is tagged with the [`id()`][Self::id] of this deadline, so whoever started the
/// deadline can tell its own expiry apart from that of any other deadline governing the same
/// task (see [`is_origin_of()`][Self::is_origin_of]).
///
/// A deadline does nothing until [started][Self::start]. Dropping a deadline cancels it.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use hub_events::{Deadline, Hub};
///
/// let hub = Hub::new();
///
/// hub.block_on({
///     let hub = hub.clone();
///
///     async move {
///         let me = hub.current_task().unwrap();
///         let deadline = Deadline::new(&hub, Duration::from_millis(5), me);
///         deadline.start();
///
///         let signal = hub.sleep(Duration::from_secs(60)).await.unwrap_err();
///         assert!(deadline.is_origin_of(&signal));
///     }
/// });
/// ```
pub struct Deadline {
    id: DeadlineId,
    duration: Duration,
    target: TaskId,
    hub: Hub,

    // Present while armed. Still present after the timer fired, which is harmless because
    // cancelling a fired timer is a no-op.
    timer: Cell<Option<TimerKey>>,
}

impl Deadline {
    /// Creates a deadline that will interrupt `target` once `duration` has elapsed after
    /// [`start()`][Self::start] is called.
    #[must_use]
    pub fn new(hub: &Hub, duration: Duration, target: TaskId) -> Self {
        Self {
            id: hub.allocate_deadline_id(),
            duration,
            target,
            hub: hub.clone(),
            timer: Cell::new(None),
        }
    }

    /// The identity carried by signals produced by this deadline.
    #[must_use]
    #[inline]
    pub fn id(&self) -> DeadlineId {
        self.id
    }

    /// How long after being started the deadline expires.
    #[must_use]
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The task the deadline interrupts when it expires.
    #[must_use]
    #[inline]
    pub fn target(&self) -> TaskId {
        self.target
    }

    /// Arms the deadline. Starting an armed deadline re-arms it from the current instant.
    ///
    /// If the target task is not parked when the deadline expires, the signal is discarded.
    pub fn start(&self) {
        self.cancel();

        let id = self.id;
        let target = self.target;

        let key = self.hub.call_later(self.duration, move |hub| {
            trace!(deadline = %id, task = %target, "deadline expired");
            DEADLINES_FIRED.with(|e| e.observe_once());

            hub.interrupt(target, DeadlineExpired::new(id));
        });

        self.timer.set(Some(key));
    }

    /// Disarms the deadline. Does nothing if it was never started or has already fired.
    pub fn cancel(&self) {
        if let Some(key) = self.timer.take() {
            self.hub.cancel_timer(key);
        }
    }

    /// Whether `signal` was produced by this deadline (as opposed to some other deadline).
    #[must_use]
    #[inline]
    pub fn is_origin_of(&self, signal: &DeadlineExpired) -> bool {
        signal.deadline() == self.id
    }

    /// Runs `future` with this deadline armed, disarming it again however the future ends.
    ///
    /// The output of `future` is returned unchanged. If it ends with a signal, use
    /// [`is_origin_of()`][Self::is_origin_of] to tell whether it was this deadline that expired.
    pub async fn scope<F, T>(&self, future: F) -> Result<T, DeadlineExpired>
    where
        F: Future<Output = Result<T, DeadlineExpired>>,
    {
        self.start();

        let _cancel = scopeguard::guard((), |()| self.cancel());

        future.await
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.id)
            .field("duration", &self.duration)
            .field("target", &self.target)
            .field("timer", &self.timer.get())
            .finish_non_exhaustive()
    }
}

/// Runs `future` in the current task under a deadline of `duration`.
///
/// * `Ok(Some(value))` - the future completed in time.
/// * `Ok(None)` - the deadline started by this call expired first.
/// * `Err(signal)` - some other deadline governing the current task expired; it is passed on
///   unchanged so that the scope that owns it can observe it.
///
/// # Panics
///
/// Panics if awaited from outside a task spawned on `hub`.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use hub_events::{Event, Hub, timeout};
///
/// let hub = Hub::new();
/// let event = Event::new();
///
/// let outcome = hub.block_on({
///     let hub = hub.clone();
///
///     async move { timeout(&hub, Duration::from_millis(5), event.wait(&hub, None)).await }
/// });
///
/// assert_eq!(outcome, Ok(None));
/// ```
pub async fn timeout<F, T>(
    hub: &Hub,
    duration: Duration,
    future: F,
) -> Result<Option<T>, DeadlineExpired>
where
    F: Future<Output = Result<T, DeadlineExpired>>,
{
    let target = hub
        .current_task()
        .expect("timeout() must be awaited from within a task spawned on the hub");

    let deadline = Deadline::new(hub, duration, target);

    match deadline.scope(future).await {
        Ok(value) => Ok(Some(value)),
        Err(signal) if deadline.is_origin_of(&signal) => Ok(None),
        Err(signal) => Err(signal),
    }
}
