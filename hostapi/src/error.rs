//! Host-side error types for the reference table and callback seam.

use crate::types::Handle;

/// Errors produced by reference-table operations.
///
/// `UseAfterInvalidate` is the load-bearing variant: the generation check
/// guarantees it fires for every stale handle, with no exceptions, since
/// guest code may retain copies of handles the host has already freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// The handle's slot was invalidated (or never allocated).
    #[error("handle {0} used after invalidate")]
    UseAfterInvalidate(Handle),

    /// The 16-bit index space is fully occupied.
    #[error("reference table exhausted")]
    Exhausted,

    /// The handle names a reserved sentinel slot, which ordinary callers
    /// may not write or invalidate.
    #[error("handle {0} is a reserved sentinel")]
    Sentinel(Handle),
}

/// Error returned by a host callback.
///
/// The bridge arms the exception channel with the message and surfaces the
/// failing call as a module fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("callback failed: {0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(msg: impl Into<String>) -> Self {
        CallbackError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = TableError::UseAfterInvalidate(Handle::from_parts(5, 2));
        assert_eq!(format!("{}", err), "handle 5v2 used after invalidate");

        let err = TableError::Sentinel(Handle::NULL);
        assert!(format!("{}", err).contains("sentinel"));

        let err = CallbackError::new("division by zero");
        assert!(format!("{}", err).contains("division by zero"));
    }
}
