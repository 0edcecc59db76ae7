use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked. Every
/// guarded structure in this crate is left consistent between statements, so
/// a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
