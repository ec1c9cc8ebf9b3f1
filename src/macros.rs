#![allow(unused_macros)]

/// Helper macro for locking items
///
/// A poisoned lock is recovered instead of propagated: the data behind every lock in this
/// crate stays consistent even if a holder panicked mid-write.
///
/// ```rust, ignore
///  let mut data = lock!(my_mutex);
///  data.some_field = 42;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}
