//! The single-threaded cooperative run loop that drives tasks.

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use foldhash::{HashMap, HashMapExt};
use futures::FutureExt;
use futures::task::noop_waker_ref;
use tracing::{debug, trace};

use crate::metrics::{TASKS_SPAWNED, TICKS_EXECUTED, TIMERS_FIRED};
use crate::{
    DeadlineExpired, DeadlineId, Resumption, TaskId, TaskSlot, TimerCallback, TimerKey,
    TimerQueue,
};

// Delays too long for `Instant` are clamped to this, which is "never" for any practical purpose.
const MAX_TIMER_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

type TickCallback = Box<dyn FnOnce(&Hub)>;

struct HubCore {
    tasks: RefCell<HashMap<TaskId, TaskSlot>>,

    // Newly spawned tasks waiting for their first poll.
    ready: RefCell<VecDeque<TaskId>>,

    ticks: RefCell<VecDeque<TickCallback>>,
    timers: RefCell<TimerQueue>,

    // The task being polled right now, if any.
    current: Cell<Option<TaskId>>,

    next_task_id: Cell<u64>,
    next_deadline_id: Cell<u64>,
}

/// A single-threaded cooperative scheduler.
///
/// Exactly one task executes at any instant and control only changes hands at explicit
/// suspension points. The hub offers the primitives that synchronization types such as
/// [`Event`][crate::Event] are built on:
///
/// * [`current_task()`][Self::current_task] identifies the running task.
/// * [`suspend_current()`][Self::suspend_current] parks the running task until something
///   transfers control back to it.
/// * [`resume()`][Self::resume] and [`interrupt()`][Self::interrupt] transfer control directly
///   into a parked task, polling it synchronously until its next suspension point or completion.
/// * [`next_tick()`][Self::next_tick] defers a callback until the currently running code yields
///   back to the run loop.
/// * [`call_later()`][Self::call_later] registers a timer.
///
/// The hub is a cheap handle - clones refer to the same run loop. Pass it explicitly to every
/// operation that needs it; there is no ambient "current hub".
///
/// Tasks are only ever driven by the hub itself. Futures that rely on a [`Waker`] from some
/// other runtime to make progress will not be woken when awaited inside a hub task.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use hub_events::Hub;
///
/// let hub = Hub::new();
///
/// let value = hub.block_on({
///     let hub = hub.clone();
///
///     async move {
///         hub.sleep(Duration::from_millis(1)).await.unwrap();
///         42
///     }
/// });
///
/// assert_eq!(value, 42);
/// ```
///
/// [`Waker`]: std::task::Waker
#[derive(Clone)]
pub struct Hub {
    core: Rc<HubCore>,
}

impl Hub {
    /// Creates a new hub with no tasks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(HubCore {
                tasks: RefCell::new(HashMap::new()),
                ready: RefCell::new(VecDeque::new()),
                ticks: RefCell::new(VecDeque::new()),
                timers: RefCell::new(TimerQueue::default()),
                current: Cell::new(None),
                next_task_id: Cell::new(0),
                next_deadline_id: Cell::new(0),
            }),
        }
    }

    /// Registers a future as a new task.
    ///
    /// The task first executes when the run loop next processes ready tasks, never synchronously
    /// from within this call.
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let task = TaskId::new(bump(&self.core.next_task_id));

        self.core
            .tasks
            .borrow_mut()
            .insert(task, TaskSlot::new(future.boxed_local()));
        self.core.ready.borrow_mut().push_back(task);

        TASKS_SPAWNED.with(|e| e.observe_once());
        trace!(%task, "task spawned");

        task
    }

    /// The task that is executing right now, or `None` if called from outside any task
    /// (e.g. from a tick callback or a timer callback).
    #[must_use]
    #[inline]
    pub fn current_task(&self) -> Option<TaskId> {
        self.core.current.get()
    }

    /// Returns a future that parks the current task until control is transferred back to it.
    ///
    /// The future completes with `Ok(())` when the task is [resumed][Self::resume] and with the
    /// delivered signal when the task is [interrupted][Self::interrupt]. A task has at most one
    /// active suspension point at a time.
    ///
    /// # Panics
    ///
    /// The returned future panics if polled from outside a task spawned on this hub.
    pub fn suspend_current(&self) -> Suspend<'_> {
        Suspend {
            hub: self,
            parked_task: None,
        }
    }

    /// Transfers control directly into a parked task.
    ///
    /// The task is polled synchronously, within this call, until it reaches its next suspension
    /// point or completes. Returns `false` and does nothing if the task is not parked: it may have
    /// completed, not started yet, or be running right now.
    pub fn resume(&self, task: TaskId) -> bool {
        self.transfer(task, Resumption::Resumed)
    }

    /// Transfers control directly into a parked task, delivering a deadline signal into its
    /// suspension point instead of a normal resumption.
    ///
    /// Otherwise behaves like [`resume()`][Self::resume].
    pub fn interrupt(&self, task: TaskId, signal: DeadlineExpired) -> bool {
        self.transfer(task, Resumption::Interrupted(signal))
    }

    /// Queues a callback to run once the currently running code yields back to the run loop.
    ///
    /// Callbacks run in the order they were queued, before the run loop processes timers or goes
    /// idle. Callbacks queued by a callback run in the same batch.
    pub fn next_tick<F>(&self, callback: F)
    where
        F: FnOnce(&Self) + 'static,
    {
        self.core.ticks.borrow_mut().push_back(Box::new(callback));
    }

    /// Registers a callback to run once `delay` has elapsed.
    ///
    /// A zero delay fires as soon as the run loop next processes timers. Delays too long to
    /// represent are clamped to a century.
    pub fn call_later<F>(&self, delay: Duration, callback: F) -> TimerKey
    where
        F: FnOnce(&Self) + 'static,
    {
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .or_else(|| now.checked_add(MAX_TIMER_DELAY))
            .expect("a century from now is always representable as an Instant");

        self.core.timers.borrow_mut().insert(due, Box::new(callback))
    }

    /// Cancels a timer registered via [`call_later()`][Self::call_later].
    ///
    /// Returns `false` if the timer already fired or was already cancelled.
    pub fn cancel_timer(&self, key: TimerKey) -> bool {
        let removed = self.core.timers.borrow_mut().remove(key);

        // The callback is dropped here, after the timer queue is no longer borrowed.
        removed.is_some()
    }

    /// Suspends the current task for at least `duration`.
    ///
    /// Returns early with the signal if a deadline targeting the current task expires first.
    ///
    /// # Panics
    ///
    /// Panics if awaited from outside a task spawned on this hub.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DeadlineExpired> {
        let task = self
            .current_task()
            .expect("Hub::sleep() must be awaited from within a task spawned on the hub");

        let timer = self.call_later(duration, move |hub| {
            hub.resume(task);
        });

        let _cancel_timer = scopeguard::guard(timer, |timer| {
            self.cancel_timer(timer);
        });

        self.suspend_current().await
    }

    /// Runs tasks, tick callbacks and timers until there is nothing left that could make
    /// progress.
    ///
    /// When only future timers remain, the calling thread is blocked until the earliest of them
    /// is due. Returns once there are no ready tasks, no queued tick callbacks and no timers.
    /// Tasks that are still parked at that point stay parked; they can still be resumed by
    /// code that runs later (e.g. a subsequent [`run()`][Self::run]).
    ///
    /// # Panics
    ///
    /// Panics if called from within a task spawned on this hub. Panics raised by tasks or
    /// callbacks propagate out of this call.
    pub fn run(&self) {
        assert!(
            self.current_task().is_none(),
            "Hub::run() cannot be called from within a task spawned on the hub"
        );

        loop {
            self.run_ready_tasks();
            self.run_ticks();

            if self.fire_due_timers() || self.has_runnable_work() {
                continue;
            }

            let next_due = self.core.timers.borrow().next_due();

            let Some(next_due) = next_due else {
                break;
            };

            let wait_time = next_due.saturating_duration_since(Instant::now());

            if !wait_time.is_zero() {
                thread::sleep(wait_time);
            }
        }

        let suspended = self.core.tasks.borrow().len();

        if suspended > 0 {
            debug!(suspended, "hub is idle with parked tasks that nothing is scheduled to wake");
        }
    }

    /// Spawns `future` as a task, runs the hub until idle and returns the output of the future.
    ///
    /// # Panics
    ///
    /// Panics if the hub goes idle before `future` completes, which means nothing is left that
    /// could ever resume it. Also panics in the same situations as [`run()`][Self::run].
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let output = Rc::new(Cell::new(None));

        self.spawn({
            let output = Rc::clone(&output);

            async move {
                output.set(Some(future.await));
            }
        });

        self.run();

        output
            .take()
            .expect("Hub::block_on() future is parked forever because the hub went idle")
    }

    /// Drops every remaining task, tick callback and timer.
    ///
    /// Dropping a parked task runs the cleanup of whatever it was suspended in, so e.g. a task
    /// waiting on an [`Event`][crate::Event] stops being a waiter. Tasks typically hold a clone
    /// of the hub, so this is also how the memory of a hub with parked tasks is released.
    pub fn shutdown(&self) {
        loop {
            // Take everything out before dropping, as dropped tasks may call back into the hub.
            let tasks = mem::take(&mut *self.core.tasks.borrow_mut());
            let ticks = mem::take(&mut *self.core.ticks.borrow_mut());
            let timers = self.core.timers.borrow_mut().take_all();
            self.core.ready.borrow_mut().clear();

            if tasks.is_empty() && ticks.is_empty() && timers.is_empty() {
                break;
            }

            debug!(
                tasks = tasks.len(),
                ticks = ticks.len(),
                timers = timers.len(),
                "dropping work left on the hub"
            );

            drop(tasks);
            drop(ticks);
            drop(timers);
        }
    }

    /// Number of live tasks, whether parked or waiting for their first poll.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    pub(crate) fn allocate_deadline_id(&self) -> DeadlineId {
        DeadlineId::new(bump(&self.core.next_deadline_id))
    }

    fn transfer(&self, task: TaskId, resumption: Resumption) -> bool {
        let delivered = self
            .core
            .tasks
            .borrow_mut()
            .get_mut(&task)
            .is_some_and(|slot| slot.deliver(resumption));

        if !delivered {
            trace!(%task, "ignoring control transfer into task that is not parked");
            return false;
        }

        self.poll_task(task);
        true
    }

    fn poll_task(&self, task: TaskId) {
        let future = self
            .core
            .tasks
            .borrow_mut()
            .get_mut(&task)
            .and_then(TaskSlot::take_future);

        let Some(mut future) = future else {
            return;
        };

        let previous = self.core.current.replace(Some(task));
        let _restore_current = scopeguard::guard(previous, |previous| {
            self.core.current.set(previous);
        });

        let mut cx = Context::from_waker(noop_waker_ref());

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                let slot = self.core.tasks.borrow_mut().remove(&task);
                drop(slot);

                trace!(%task, "task completed");
            }
            Poll::Pending => {
                if let Some(slot) = self.core.tasks.borrow_mut().get_mut(&task) {
                    slot.restore_future(future);
                    return;
                }

                // The hub was shut down while the task was running. The future is dropped on
                // return, after the task table is no longer borrowed.
                trace!(%task, "task removed while it was running");
            }
        }
    }

    fn with_slot<R>(&self, task: TaskId, f: impl FnOnce(&mut TaskSlot) -> R) -> Option<R> {
        self.core.tasks.borrow_mut().get_mut(&task).map(f)
    }

    fn run_ready_tasks(&self) {
        loop {
            let next = self.core.ready.borrow_mut().pop_front();

            let Some(task) = next else {
                break;
            };

            self.poll_task(task);
        }
    }

    fn run_ticks(&self) {
        loop {
            let next = self.core.ticks.borrow_mut().pop_front();

            let Some(tick) = next else {
                break;
            };

            tick(self);
            TICKS_EXECUTED.with(|e| e.observe_once());
        }
    }

    /// Fires every timer that is due as of now. Returns whether any timer fired.
    fn fire_due_timers(&self) -> bool {
        let now = Instant::now();
        let mut fired_any = false;

        loop {
            let next: Option<TimerCallback> = self.core.timers.borrow_mut().pop_due(now);

            let Some(callback) = next else {
                break;
            };

            callback(self);
            fired_any = true;
            TIMERS_FIRED.with(|e| e.observe_once());
        }

        fired_any
    }

    fn has_runnable_work(&self) -> bool {
        !self.core.ready.borrow().is_empty() || !self.core.ticks.borrow().is_empty()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("current", &self.core.current.get())
            .field("tasks", &self.core.tasks.borrow().len())
            .field("ready", &self.core.ready.borrow().len())
            .field("ticks", &self.core.ticks.borrow().len())
            .field("timers", &self.core.timers.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Hub::suspend_current()`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend<'a> {
    hub: &'a Hub,

    // Set once the task has been parked by the first poll.
    parked_task: Option<TaskId>,
}

impl Future for Suspend<'_> {
    type Output = Result<(), DeadlineExpired>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(task) = this.parked_task else {
            let task = this.hub.current_task().expect(
                "Hub::suspend_current() must be awaited from within a task spawned on the hub",
            );

            this.hub.with_slot(task, TaskSlot::park);
            this.parked_task = Some(task);

            return Poll::Pending;
        };

        let resumption = this
            .hub
            .with_slot(task, TaskSlot::take_resumption)
            .flatten();

        match resumption {
            Some(resumption) => {
                this.parked_task = None;
                Poll::Ready(resumption.into_result())
            }
            None => {
                // Polled without a control transfer. Stay parked.
                this.hub.with_slot(task, TaskSlot::park);
                Poll::Pending
            }
        }
    }
}

impl Drop for Suspend<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.parked_task.take() {
            self.hub.with_slot(task, TaskSlot::unpark);
        }
    }
}

fn bump(counter: &Cell<u64>) -> u64 {
    let value = counter.get();
    counter.set(value.wrapping_add(1));
    value
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::RefCell;

    use static_assertions::assert_not_impl_any;
    use testing::with_watchdog;

    use super::*;

    assert_not_impl_any!(Hub: Send, Sync);

    fn log() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn spawned_task_runs_only_when_hub_runs() {
        let hub = Hub::new();
        let ran = Rc::new(Cell::new(false));

        hub.spawn({
            let ran = Rc::clone(&ran);
            async move { ran.set(true) }
        });

        assert!(!ran.get());
        assert_eq!(hub.task_count(), 1);

        hub.run();

        assert!(ran.get());
        assert_eq!(hub.task_count(), 0);
    }

    #[test]
    fn current_task_is_set_only_inside_task() {
        let hub = Hub::new();
        let observed = Rc::new(Cell::new(None));

        let task = hub.spawn({
            let hub = hub.clone();
            let observed = Rc::clone(&observed);
            async move { observed.set(hub.current_task()) }
        });

        assert_eq!(hub.current_task(), None);
        hub.run();

        assert_eq!(observed.get(), Some(task));
        assert_eq!(hub.current_task(), None);
    }

    #[test]
    fn resume_transfers_control_synchronously() {
        let hub = Hub::new();
        let steps = log();

        let task = hub.spawn({
            let hub = hub.clone();
            let steps = Rc::clone(&steps);

            async move {
                steps.borrow_mut().push("before suspend");
                hub.suspend_current().await.unwrap();
                steps.borrow_mut().push("after resume");
            }
        });

        hub.run();
        assert_eq!(*steps.borrow(), vec!["before suspend"]);

        assert!(hub.resume(task));

        // The continuation ran inside resume().
        assert_eq!(*steps.borrow(), vec!["before suspend", "after resume"]);
        assert_eq!(hub.task_count(), 0);
    }

    #[test]
    fn resume_of_task_that_is_not_parked_is_ignored() {
        let hub = Hub::new();

        let task = hub.spawn(async {});

        // Not started yet.
        assert!(!hub.resume(task));

        hub.run();

        // Completed.
        assert!(!hub.resume(task));
    }

    #[test]
    fn task_cannot_resume_itself() {
        let hub = Hub::new();
        let outcome = Rc::new(Cell::new(None));

        hub.spawn({
            let hub = hub.clone();
            let outcome = Rc::clone(&outcome);

            async move {
                let me = hub.current_task().unwrap();
                outcome.set(Some(hub.resume(me)));
            }
        });

        hub.run();

        assert_eq!(outcome.get(), Some(false));
    }

    #[test]
    fn interrupt_delivers_signal() {
        let hub = Hub::new();
        let outcome = Rc::new(Cell::new(None));
        let signal = DeadlineExpired::new(hub.allocate_deadline_id());

        let task = hub.spawn({
            let hub = hub.clone();
            let outcome = Rc::clone(&outcome);

            async move {
                outcome.set(Some(hub.suspend_current().await));
            }
        });

        hub.run();
        assert!(hub.interrupt(task, signal));

        assert_eq!(outcome.get(), Some(Err(signal)));
    }

    #[test]
    fn ticks_run_in_order_including_nested() {
        let hub = Hub::new();
        let steps = log();

        hub.next_tick({
            let steps = Rc::clone(&steps);

            move |hub| {
                steps.borrow_mut().push("first");

                let steps = Rc::clone(&steps);
                hub.next_tick(move |_| steps.borrow_mut().push("nested"));
            }
        });

        hub.next_tick({
            let steps = Rc::clone(&steps);
            move |_| steps.borrow_mut().push("second")
        });

        hub.run();

        assert_eq!(*steps.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn ticks_run_before_due_timers() {
        let hub = Hub::new();
        let steps = log();

        hub.call_later(Duration::ZERO, {
            let steps = Rc::clone(&steps);
            move |_| steps.borrow_mut().push("timer")
        });

        hub.next_tick({
            let steps = Rc::clone(&steps);
            move |_| steps.borrow_mut().push("tick")
        });

        hub.run();

        assert_eq!(*steps.borrow(), vec!["tick", "timer"]);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let hub = Hub::new();
        let fired = Rc::new(Cell::new(false));

        let key = hub.call_later(Duration::from_millis(5), {
            let fired = Rc::clone(&fired);
            move |_| fired.set(true)
        });

        assert!(hub.cancel_timer(key));
        assert!(!hub.cancel_timer(key));

        hub.run();

        assert!(!fired.get());
    }

    #[test]
    fn unrepresentable_delay_is_clamped() {
        let hub = Hub::new();
        let before = Instant::now();

        let key = hub.call_later(Duration::MAX, |_| panic!("timer must never fire"));

        assert!(key.due() > before.checked_add(Duration::from_secs(3600)).unwrap());
        assert!(key.due() <= Instant::now().checked_add(MAX_TIMER_DELAY).unwrap());
        assert!(hub.cancel_timer(key));
    }

    #[test]
    fn sleep_waits_at_least_the_duration() {
        with_watchdog(|| {
            let hub = Hub::new();

            let elapsed = hub.block_on({
                let hub = hub.clone();

                async move {
                    let started = Instant::now();
                    hub.sleep(Duration::from_millis(20)).await.unwrap();
                    started.elapsed()
                }
            });

            assert!(elapsed >= Duration::from_millis(20));
        });
    }

    #[test]
    fn sleep_is_interruptible() {
        with_watchdog(|| {
            let hub = Hub::new();
            let signal = DeadlineExpired::new(hub.allocate_deadline_id());

            let task = hub.spawn({
                let hub = hub.clone();

                async move {
                    let result = hub.sleep(Duration::from_secs(3600)).await;
                    assert_eq!(result, Err(signal));
                }
            });

            hub.call_later(Duration::ZERO, move |hub| {
                hub.interrupt(task, signal);
            });

            hub.run();

            // The sleep timer was cancelled, so run() did not block for an hour.
            assert_eq!(hub.task_count(), 0);
        });
    }

    #[test]
    fn block_on_returns_output() {
        let hub = Hub::new();

        assert_eq!(hub.block_on(async { 5 + 5 }), 10);
    }

    #[test]
    #[should_panic]
    fn block_on_panics_when_future_can_never_complete() {
        let hub = Hub::new();

        hub.block_on({
            let hub = hub.clone();

            async move {
                drop(hub.suspend_current().await);
            }
        });
    }

    #[test]
    fn run_returns_with_parked_tasks_left_over() {
        let hub = Hub::new();

        let task = hub.spawn({
            let hub = hub.clone();

            async move {
                hub.suspend_current().await.unwrap();
            }
        });

        hub.run();
        assert_eq!(hub.task_count(), 1);

        assert!(hub.resume(task));
        assert_eq!(hub.task_count(), 0);
    }

    #[test]
    fn shutdown_drops_parked_tasks_and_pending_work() {
        let hub = Hub::new();
        let dropped = Rc::new(Cell::new(false));

        hub.spawn({
            let hub = hub.clone();
            let guard = scopeguard::guard(Rc::clone(&dropped), |dropped| dropped.set(true));

            async move {
                let _guard = guard;
                hub.suspend_current().await.unwrap();
            }
        });

        hub.run();
        hub.next_tick(|_| panic!("tick must not run after shutdown"));
        hub.call_later(Duration::ZERO, |_| panic!("timer must not fire after shutdown"));

        hub.shutdown();

        assert!(dropped.get());
        assert_eq!(hub.task_count(), 0);

        hub.run();
    }

    #[test]
    fn deadline_ids_are_unique() {
        let hub = Hub::new();

        let first = hub.allocate_deadline_id();
        let second = hub.allocate_deadline_id();

        assert_ne!(first, second);
    }
}
