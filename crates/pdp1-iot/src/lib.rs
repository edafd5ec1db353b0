//! IOT device-module framework for the PDP-1 emulator.
//!
//! The processor core hands every IOT instruction to an [`IotRegistry`], which resolves the
//! 6-bit device number to an [`IotDevice`] and calls it twice: once as the IOT pulse rises and
//! once as it falls. Devices that need to make progress between instructions (sockets, timers)
//! ask for periodic [`IotDevice::poll`] calls via [`IotContext::set_poll_interval`].
#![forbid(unsafe_code)]

mod device;
mod registry;

pub use device::{IotContext, IotDevice, Processor, Pulse};
pub use registry::{IotFactory, IotRegistry};

use thiserror::Error;

/// Highest IOT device number addressable by an instruction (`mb & 077`).
pub const MAX_DEVICE: u8 = 0o77;

/// Number of sequence-break (priority interrupt) lines a device may request.
pub const BREAK_LINES: u8 = 16;

/// Errors raised while resolving a device number to a handler.
///
/// These never reach the emulated processor: a failed resolution simply leaves the IOT
/// undefined, exactly as if no handler existed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IotError {
    #[error("no handler registered for IOT {0:02o}")]
    Unregistered(u8),

    #[error("IOT {alias:02o} aliases IOT {target:02o}, which has no usable handler")]
    AliasTarget { alias: u8, target: u8 },

    #[error("IOT {device:02o} failed to initialize: {reason}")]
    Init { device: u8, reason: String },
}
