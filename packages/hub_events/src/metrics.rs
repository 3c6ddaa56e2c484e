//! Metrics for the hub run loop and the events driven by it.
//!
//! The hub is single-threaded, so every metric is a per-thread event instance.

use nm::{Event, Magnitude};

/// Histogram buckets for the number of waiters resumed by one notify pass.
const NOTIFY_PASS_RESUMED_BUCKETS: &[Magnitude] = &[0, 1, 2, 4, 8, 16, 32, 64, 128];

/// Histogram buckets for the time a task spent suspended in `Event::wait()`, in milliseconds.
///
/// Waits range from "woken on the next tick" to long-lived parking, so the buckets are wide.
const WAIT_DURATION_MS_BUCKETS: &[Magnitude] = &[0, 1, 5, 10, 50, 100, 500, 1000, 5000];

thread_local! {
    /// Tasks spawned on any hub owned by this thread.
    pub(crate) static TASKS_SPAWNED: Event = Event::builder()
        .name("hub_events_tasks_spawned")
        .build();

    /// Callbacks executed via `Hub::next_tick()`.
    pub(crate) static TICKS_EXECUTED: Event = Event::builder()
        .name("hub_events_ticks_executed")
        .build();

    /// Timers that expired and had their callback executed.
    pub(crate) static TIMERS_FIRED: Event = Event::builder()
        .name("hub_events_timers_fired")
        .build();

    /// Deadlines that expired and interrupted their target task.
    pub(crate) static DEADLINES_FIRED: Event = Event::builder()
        .name("hub_events_deadlines_fired")
        .build();

    /// Number of waiters resumed by each notify pass.
    ///
    /// The magnitude is the count of resumed tasks.
    pub(crate) static NOTIFY_PASS_RESUMED: Event = Event::builder()
        .name("hub_events_notify_pass_resumed")
        .histogram(NOTIFY_PASS_RESUMED_BUCKETS)
        .build();

    /// Waits that ended because their own timeout expired.
    pub(crate) static WAIT_TIMEOUTS: Event = Event::builder()
        .name("hub_events_wait_timeouts")
        .build();

    /// Time a task spent suspended inside `Event::wait()`.
    ///
    /// The magnitude is the suspension time in milliseconds. Fast-path waits are not recorded.
    pub(crate) static WAIT_DURATION_MS: Event = Event::builder()
        .name("hub_events_wait_duration_ms")
        .histogram(WAIT_DURATION_MS_BUCKETS)
        .build();
}
