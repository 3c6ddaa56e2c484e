use std::fmt::{self, Display};

use thiserror::Error;

/// Identifies one [`Deadline`][crate::Deadline] instance.
///
/// Identifiers are unique within the [`Hub`][crate::Hub] that created the deadline, which lets a
/// task that is governed by several nested deadlines tell apart which one of them expired.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeadlineId(u64);

impl DeadlineId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl Display for DeadlineId {
    #[cfg_attr(test, mutants::skip)] // No API contract for the display format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline-{}", self.0)
    }
}

/// Delivered into a suspended task when a [`Deadline`][crate::Deadline] targeting that task
/// expires.
///
/// This is the only signal that can interrupt a suspended task. It is tagged with the
/// [`DeadlineId`] of the deadline that produced it, so an operation that started its own
/// deadline can recognize its own expiry and let every other expiry propagate to its caller.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("{deadline} expired")]
pub struct DeadlineExpired {
    deadline: DeadlineId,
}

impl DeadlineExpired {
    pub(crate) const fn new(deadline: DeadlineId) -> Self {
        Self { deadline }
    }

    /// The deadline that produced this signal.
    #[must_use]
    #[inline]
    pub fn deadline(&self) -> DeadlineId {
        self.deadline
    }
}
