//! Boolean wait/notify events for tasks on a [`Hub`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use foldhash::HashSet;
use tracing::trace;

use crate::metrics::{NOTIFY_PASS_RESUMED, WAIT_DURATION_MS, WAIT_TIMEOUTS};
use crate::{Deadline, DeadlineExpired, Hub, TaskId};

/// A boolean flag that tasks can wait on until it is set.
///
/// Any number of tasks may [`wait()`][Self::wait] for the event. Once it is [`set()`][Self::set],
/// every task that was waiting at that time is resumed, no later than on the next tick of the
/// hub. The flag stays set until [`clear()`][Self::clear] is called, so waits that start while it
/// is set complete immediately.
///
/// The event is a cheap handle - clones refer to the same event.
///
/// # Example
///
/// ```rust
/// use hub_events::{Event, Hub};
///
/// let hub = Hub::new();
/// let event = Event::new();
///
/// hub.spawn({
///     let hub = hub.clone();
///     let event = event.clone();
///
///     async move {
///         assert!(event.wait(&hub, None).await.unwrap());
///         println!("event was set");
///     }
/// });
///
/// hub.spawn({
///     let hub = hub.clone();
///     let event = event.clone();
///
///     async move { event.set(&hub) }
/// });
///
/// hub.run();
/// assert!(event.is_set());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Event {
    state: Rc<EventState>,
}

#[derive(Debug, Default)]
struct EventState {
    flag: Cell<bool>,

    // Tasks currently suspended inside `wait()` on this event.
    waiters: RefCell<HashSet<TaskId>>,
}

impl Event {
    /// Creates an event that is not set and has no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the event is set.
    ///
    /// Right after [`set()`][Self::set] this already returns `true` even though the waiters have
    /// not been resumed yet - that only happens on the next tick of the hub.
    #[must_use]
    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.flag.get()
    }

    /// Number of tasks currently suspended in [`wait()`][Self::wait] on this event.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state.waiters.borrow().len()
    }

    /// Sets the event and schedules every current waiter to be resumed on the next tick.
    ///
    /// No waiter is resumed from within this call. Setting an event that is already set is
    /// harmless.
    pub fn set(&self, hub: &Hub) {
        self.state.flag.set(true);

        if self.state.waiters.borrow().is_empty() {
            return;
        }

        let event = self.clone();
        hub.next_tick(move |hub| event.notify_waiters(hub));
    }

    /// Clears the event.
    ///
    /// Tasks already waiting are not affected; they keep waiting for the next
    /// [`set()`][Self::set] or their timeout. Future waits will suspend again.
    pub fn clear(&self) {
        self.state.flag.set(false);
    }

    /// Suspends the current task until the event is set or `timeout` elapses.
    ///
    /// Returns the state of the flag at the time the wait ends: `true` if the event was already
    /// set or was set while waiting, `false` if the timeout elapsed first. A zero timeout still
    /// suspends until the hub next processes timers, unless the event is already set.
    ///
    /// # Errors
    ///
    /// If some other [`Deadline`] governing the current task expires during the wait, its
    /// signal is returned unchanged. The expiry of this call's own timeout is never an error.
    ///
    /// # Panics
    ///
    /// Panics if the event is not set and the wait is awaited from outside a task spawned on
    /// `hub`.
    pub async fn wait(
        &self,
        hub: &Hub,
        timeout: Option<Duration>,
    ) -> Result<bool, DeadlineExpired> {
        if self.is_set() {
            return Ok(true);
        }

        let task = hub
            .current_task()
            .expect("Event::wait() must be awaited from within a task spawned on the hub");

        let registered = self.state.waiters.borrow_mut().insert(task);
        debug_assert!(registered, "{task} is already waiting on this event");

        let suspended_at = Instant::now();

        let deadline = timeout.map(|timeout| {
            let deadline = Deadline::new(hub, timeout, task);
            deadline.start();
            deadline
        });

        // Runs however the wait ends, including when the wait future is dropped while suspended.
        let deadline = scopeguard::guard(deadline, move |deadline| {
            if let Some(deadline) = deadline {
                deadline.cancel();
            }

            self.state.waiters.borrow_mut().remove(&task);
        });

        if let Err(signal) = hub.suspend_current().await {
            if !matches!(&*deadline, Some(own) if own.is_origin_of(&signal)) {
                trace!(%task, deadline = %signal.deadline(), "foreign deadline interrupted wait");
                return Err(signal);
            }

            WAIT_TIMEOUTS.with(|e| e.observe_once());
        }

        drop(deadline);

        WAIT_DURATION_MS.with(|e| e.observe_millis(suspended_at.elapsed()));

        Ok(self.is_set())
    }

    fn notify_waiters(&self, hub: &Hub) {
        // Resuming a waiter runs its continuation right here, which removes it from the live set
        // and may do anything else to this event, so we iterate over a snapshot instead.
        let mut snapshot: Vec<TaskId> = self.state.waiters.borrow().iter().copied().collect();
        let mut resumed: usize = 0;

        while let Some(task) = snapshot.pop() {
            let still_waiting = self.state.waiters.borrow().contains(&task);

            if !still_waiting {
                trace!(%task, "skipping task that stopped waiting before it was notified");
                continue;
            }

            if hub.resume(task) {
                resumed = resumed.saturating_add(1);
            }
        }

        NOTIFY_PASS_RESUMED.with(|e| e.observe(resumed));
        trace!(resumed, "event notify pass completed");
    }
}
