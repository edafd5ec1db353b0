//! Type 30 data-control system for the PDP-1, with TCP sockets in place of serial lines.
//!
//! The controller answers IOT 22. It multiplexes up to [`config::MAX_CHANNELS`] TCP
//! connections (server or client) behind a single "current channel", requests sequence breaks
//! for channel events and optionally translates between ASCII on the wire and Concise
//! (Flexowriter code) in the IO register.
//!
//! Sockets are only serviced from the device's poll callback, so nothing here ever blocks the
//! emulated processor.
#![forbid(unsafe_code)]

pub mod channel;
pub mod command;
pub mod config;
mod dcs;
pub mod error;
pub mod flexo;
pub mod interrupt;
mod poll;
pub mod poller;
pub mod ports;
pub mod scb;

pub use command::Command;
pub use config::DcsConfig;
pub use dcs::{translate, Dcs, NO_CHANNEL, RXL_CHANGE, RXL_FLEX, RXL_SHIFTED};
pub use error::DcsError;

use pdp1_iot::{IotDevice, IotRegistry};

/// IOT device number of the data-control system.
pub const DEVICE: u8 = 0o22;

/// Make the controller available at IOT 22. It is only built when first addressed.
pub fn register(registry: &mut IotRegistry, config: DcsConfig) {
    registry.register(DEVICE, move || {
        Ok(Box::new(Dcs::new(config.clone())) as Box<dyn IotDevice>)
    });
}
