//! Utility macros used internally by the transport.

/// Early return with an error if a condition is not met.
///
/// Like `assert!`, but returns `Err($error)` instead of panicking.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
