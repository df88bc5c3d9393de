//! Single-slot exception channel between guest and host.
//!
//! Guest code arms the channel with a reference-table handle immediately
//! before an abnormal return; the loader's call wrapper drains it exactly
//! once per failing call. State machine: `Empty → Armed → Empty`.
//! Arming an already armed channel is a protocol violation and is
//! detected rather than left undefined.
//!
//! The channel is a field of the instance state, never process-global, so
//! multiple loaded instances cannot interfere with each other.

use tether_hostapi::Handle;

/// Error returned when `store` finds the channel already armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("exception channel already armed")]
pub struct ChannelArmed;

/// Single-slot holding area for one in-flight error value.
#[derive(Debug, Default)]
pub struct ExnChannel {
    slot: Option<Handle>,
}

impl ExnChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the channel with the error value's handle.
    pub fn store(&mut self, handle: Handle) -> Result<(), ChannelArmed> {
        if self.slot.is_some() {
            return Err(ChannelArmed);
        }
        self.slot = Some(handle);
        Ok(())
    }

    /// Drain the channel, returning to `Empty`.
    pub fn take(&mut self) -> Option<Handle> {
        self.slot.take()
    }

    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }
}
