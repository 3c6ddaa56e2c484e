#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Wait/notify events for tasks running on a single-threaded cooperative hub.
//!
//! The crate consists of two layers:
//!
//! - [`Hub`] - a run loop that executes exactly one task at a time. Tasks give up control only at
//!   explicit suspension points and are brought back by a direct control transfer
//!   ([`Hub::resume()`]), by a [`Deadline`] expiring ([`Hub::interrupt()`]) or by a timer. The
//!   hub also runs callbacks deferred to its next tick.
//! - [`Event`] - a boolean flag that any number of tasks can wait on, with an optional timeout
//!   per wait.
//!
//! Everything is single-threaded. No type in this crate is `Send` or `Sync` and no locks or
//! atomics are involved - the cooperative scheduling model serializes all access.
//!
//! # Waiting for an event
//!
//! ```rust
//! use std::time::Duration;
//!
//! use hub_events::{Event, Hub};
//!
//! let hub = Hub::new();
//! let event = Event::new();
//!
//! // Nobody sets the event, so this wait times out.
//! let was_set = hub.block_on({
//!     let hub = hub.clone();
//!     let event = event.clone();
//!
//!     async move { event.wait(&hub, Some(Duration::from_millis(10))).await.unwrap() }
//! });
//! assert!(!was_set);
//!
//! // Once set, waits complete immediately.
//! event.set(&hub);
//!
//! let was_set = hub.block_on({
//!     let hub = hub.clone();
//!
//!     async move { event.wait(&hub, None).await.unwrap() }
//! });
//! assert!(was_set);
//! ```
//!
//! # Deadlines
//!
//! A timed-out [`Event::wait()`] is not an error - it simply returns `false`. The only error is
//! [`DeadlineExpired`], raised when some *other* deadline governing the waiting task expires. It
//! always propagates to the caller so that the scope that started that deadline can observe it,
//! e.g. via [`timeout()`] or [`Deadline::scope()`].
//!
//! ```rust
//! use std::time::Duration;
//!
//! use hub_events::{Event, Hub, timeout};
//!
//! let hub = Hub::new();
//! let event = Event::new();
//!
//! let outcome = hub.block_on({
//!     let hub = hub.clone();
//!
//!     async move {
//!         // The enclosing 5 ms scope expires long before the wait's own 60 second timeout.
//!         timeout(&hub, Duration::from_millis(5), async {
//!             event.wait(&hub, Some(Duration::from_secs(60))).await
//!         })
//!         .await
//!     }
//! });
//!
//! assert_eq!(outcome, Ok(None));
//! ```

mod deadline;
mod error;
mod event;
mod hub;
mod metrics;
mod task;
mod timers;

pub use deadline::*;
pub use error::*;
pub use event::*;
pub use hub::*;
pub use task::TaskId;
pub(crate) use task::{Resumption, TaskSlot};
pub use timers::TimerKey;
pub(crate) use timers::{TimerCallback, TimerQueue};
