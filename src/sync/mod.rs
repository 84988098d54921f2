pub mod delegation;
pub mod lamports_bakery;
pub mod spin;

pub use spin::Spin;

/// Mutex used through a handle that already knows which participant it acts for.
///
/// The requirements for that are
/// 1. Mutual Exclusion - at most one guard across all handles of the same lock is alive at a time.
/// 2. No Starvation - assuming OS threads eventually run, handleN can never cause handleM (N!=M)
///    to wait forever in `acquire()`.
///
/// Calling `release()` without holding the lock, or acquiring twice through the same handle,
/// breaks the contract and is not detected.
pub trait Mutex {
    fn acquire(&self) -> MutexGuard<'_, Self>
    where
        Self: Sized;
    fn release(&self);
}

/// Releases the mutex when dropped.
#[must_use = "dropping the guard releases the mutex immediately"]
#[derive(Debug)]
pub struct MutexGuard<'a, M: Mutex> {
    pub(crate) mutex: &'a M,
}

impl<M: Mutex> Drop for MutexGuard<'_, M> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}
