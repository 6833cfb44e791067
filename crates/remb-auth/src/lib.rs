use std::sync::{Mutex, MutexGuard};

mod loopback;
mod session;

pub use loopback::{Callback, DEFAULT_LISTEN_TIMEOUT, Loopback};
pub use session::{AuthPhase, Session, SignInFlow};

/// Lock acquisition that survives a poisoned mutex; listener and session
/// state stay usable after a panicking worker thread.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
