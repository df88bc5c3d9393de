//! Host callback trait — the seam between guest-invoked trampolines and
//! host-resident captured state.
//!
//! The bridge does the pointer work; callbacks see resolved `HostValue`
//! arguments and return a `HostValue`, never raw guest memory.

use crate::error::CallbackError;
use crate::types::HostValue;

/// A host-supplied callback invokable from guest code by handle.
///
/// The receiver is `&mut self` so captured state can evolve across
/// invocations. A returned error arms the instance's exception channel and
/// surfaces the in-flight guest call as a module fault.
pub trait HostCallback: Send {
    fn call(&mut self, args: &[HostValue]) -> Result<HostValue, CallbackError>;
}

impl<F> HostCallback for F
where
    F: FnMut(&[HostValue]) -> Result<HostValue, CallbackError> + Send,
{
    fn call(&mut self, args: &[HostValue]) -> Result<HostValue, CallbackError> {
        self(args)
    }
}
