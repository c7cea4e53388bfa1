use std::panic;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub mod mock_vm;

/// Run `f` on another thread and fail the test if it does not finish within `millis`. Used for
/// tests of worker termination and refinement shutdown, which hang rather than fail when wrong.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        // The receiver is gone only if we already timed out.
        let _ = done_tx.send(());
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(()) => handle.join().expect("Test thread panicked"),
        Err(e) => panic!("Test did not finish in {} ms: {}", millis, e),
    }
}

lazy_static! {
    // Options read G1_* environment variables, so tests that set them run one at a time.
    static ref ENV_LOCK: Mutex<()> = Mutex::default();
}

pub fn serial_test<F: FnOnce()>(f: F) {
    // A failed test poisons the lock. The remaining tests still run.
    let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Run `test`, then `cleanup` even if `test` panicked.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let result = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = result {
        panic::resume_unwind(e);
    }
}
