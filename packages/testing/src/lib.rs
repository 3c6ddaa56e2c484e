#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests and examples in this workspace.

use std::panic;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a test may run before the watchdog declares it hung.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a test body on a separate thread and fails the test if it does not finish in time.
///
/// A hub that has lost track of a wakeup typically blocks forever on a timer or spins on a
/// tick that never runs dry, so every test that drives a hub should be wrapped in this.
///
/// The body runs on its own thread, so anything single-threaded (hubs, events) must be created
/// inside the closure.
///
/// Setting the `MUTATION_TESTING` environment variable to "1" disables the watchdog, so that
/// mutation testing can observe mutations that make a test hang.
///
/// # Panics
///
/// Panics if the test body does not finish within the timeout. A panic raised by the test body
/// is propagated unchanged.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let value = with_watchdog(|| 2 + 2);
/// assert_eq!(value, 4);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_thread = thread::spawn(move || {
        // If the receiver already gave up on us, there is nobody left to tell.
        drop(tx.send(test_fn()));
    });

    match rx.recv_timeout(WATCHDOG_TIMEOUT) {
        Ok(result) => {
            test_thread
                .join()
                .expect("test thread finished its work and cannot panic afterwards");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {WATCHDOG_TIMEOUT:?} and is probably hung");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_thread.join() {
            Ok(()) => panic!("test thread exited without reporting a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}
