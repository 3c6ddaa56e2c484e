//! Task identity and the bookkeeping the hub keeps for every live task.

use std::any::type_name;
use std::fmt::{self, Display};

use futures::future::LocalBoxFuture;

use crate::DeadlineExpired;

/// Identifies a task spawned on a [`Hub`][crate::Hub].
///
/// Identifiers are never reused by the hub that issued them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl Display for TaskId {
    #[cfg_attr(test, mutants::skip)] // No API contract for the display format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Why a parked task was given control again.
#[derive(Debug)]
pub(crate) enum Resumption {
    Resumed,
    Interrupted(DeadlineExpired),
}

impl Resumption {
    pub(crate) fn into_result(self) -> Result<(), DeadlineExpired> {
        match self {
            Self::Resumed => Ok(()),
            Self::Interrupted(signal) => Err(signal),
        }
    }
}

pub(crate) struct TaskSlot {
    // `None` while the hub is polling the task.
    future: Option<LocalBoxFuture<'static, ()>>,

    // Set while the task is suspended at a hub suspension point, waiting for a control transfer.
    parked: bool,

    resumption: Option<Resumption>,
}

impl TaskSlot {
    pub(crate) fn new(future: LocalBoxFuture<'static, ()>) -> Self {
        Self {
            future: Some(future),
            parked: false,
            resumption: None,
        }
    }

    pub(crate) fn take_future(&mut self) -> Option<LocalBoxFuture<'static, ()>> {
        self.future.take()
    }

    pub(crate) fn restore_future(&mut self, future: LocalBoxFuture<'static, ()>) {
        debug_assert!(self.future.is_none(), "task future restored twice");

        self.future = Some(future);
    }

    pub(crate) fn park(&mut self) {
        self.parked = true;
    }

    pub(crate) fn unpark(&mut self) {
        self.parked = false;
    }

    /// Hands a resumption to a parked task.
    ///
    /// Returns `false` if the task is not currently parked or is in the middle of being polled,
    /// in which case the resumption is discarded.
    pub(crate) fn deliver(&mut self, resumption: Resumption) -> bool {
        if !self.parked || self.future.is_none() {
            return false;
        }

        self.parked = false;
        self.resumption = Some(resumption);
        true
    }

    pub(crate) fn take_resumption(&mut self) -> Option<Resumption> {
        self.resumption.take()
    }
}

impl fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("running", &self.future.is_none())
            .field("parked", &self.parked)
            .field("resumption", &self.resumption)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::FutureExt;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::DeadlineId;

    assert_impl_all!(TaskId: Send, Sync, Copy, Ord);

    fn idle_slot() -> TaskSlot {
        TaskSlot::new(async {}.boxed_local())
    }

    #[test]
    fn fresh_slot_rejects_delivery() {
        let mut slot = idle_slot();

        assert!(!slot.deliver(Resumption::Resumed));
        assert!(slot.take_resumption().is_none());
    }

    #[test]
    fn parked_slot_accepts_one_delivery() {
        let mut slot = idle_slot();
        slot.park();

        assert!(slot.deliver(Resumption::Resumed));
        assert!(!slot.deliver(Resumption::Resumed));

        assert!(matches!(slot.take_resumption(), Some(Resumption::Resumed)));
        assert!(slot.take_resumption().is_none());
    }

    #[test]
    fn running_slot_rejects_delivery() {
        let mut slot = idle_slot();
        let future = slot.take_future().unwrap();
        slot.park();

        assert!(!slot.deliver(Resumption::Resumed));

        slot.restore_future(future);
        assert!(slot.deliver(Resumption::Resumed));
    }

    #[test]
    fn unparked_slot_rejects_delivery() {
        let mut slot = idle_slot();
        slot.park();
        slot.unpark();

        assert!(!slot.deliver(Resumption::Resumed));
    }

    #[test]
    fn interruption_becomes_error() {
        let signal = DeadlineExpired::new(DeadlineId::new(5));

        assert_eq!(Resumption::Interrupted(signal).into_result(), Err(signal));
        assert_eq!(Resumption::Resumed.into_result(), Ok(()));
    }
}
