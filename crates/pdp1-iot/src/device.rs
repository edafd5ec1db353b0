use crate::BREAK_LINES;

/// The two halves of an IOT pulse.
///
/// A device decides what it will do while the pulse rises (and may tell the processor not to
/// wait for it), then finishes the operation and optionally signals completion as it falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    Rising,
    Falling,
}

/// The slice of processor state an IOT device is allowed to touch.
///
/// Implemented by the processor core; the device framework never sees anything else.
pub trait Processor {
    /// The 18-bit IO register.
    fn io(&self) -> u32;
    fn set_io(&mut self, value: u32);

    /// The instruction currently being executed (memory buffer register).
    fn instruction(&self) -> u32;

    /// Read a word of core in the current memory field.
    fn read_core(&self, addr: u16) -> u32;

    /// Request a sequence break on `line`.
    fn request_break(&mut self, line: u8);

    /// Deliver the completion pulse for the current IOT.
    fn io_complete(&mut self);

    /// Release the processor from waiting on the current IOT.
    fn io_no_wait(&mut self);
}

/// Handle passed to a device for the duration of one callback.
pub struct IotContext<'a> {
    cpu: &'a mut dyn Processor,
    device: u8,
    poll_interval: &'a mut u32,
}

impl<'a> IotContext<'a> {
    pub(crate) fn new(cpu: &'a mut dyn Processor, device: u8, poll_interval: &'a mut u32) -> Self {
        Self {
            cpu,
            device,
            poll_interval,
        }
    }

    /// Device number the instruction addressed (the alias number when dispatched via an alias).
    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn io(&self) -> u32 {
        self.cpu.io()
    }

    pub fn set_io(&mut self, value: u32) {
        self.cpu.set_io(value & 0o777_777);
    }

    pub fn instruction(&self) -> u32 {
        self.cpu.instruction()
    }

    pub fn read_core(&self, addr: u16) -> u32 {
        self.cpu.read_core(addr)
    }

    /// Ask the processor for a priority interrupt on `line`.
    ///
    /// Only the 16 sequence-break lines exist; requests for any other line are dropped.
    pub fn request_interrupt(&mut self, line: u8) {
        if line < BREAK_LINES {
            self.cpu.request_break(line);
        } else {
            tracing::warn!(
                device = self.device,
                line,
                "dropping interrupt request on nonexistent break line"
            );
        }
    }

    pub fn complete(&mut self) {
        self.cpu.io_complete();
    }

    pub fn no_wait(&mut self) {
        self.cpu.io_no_wait();
    }

    /// Poll this device every `cycles` instruction cycles; `0` stops polling.
    pub fn set_poll_interval(&mut self, cycles: u32) {
        *self.poll_interval = cycles;
    }
}

/// A pluggable IOT device.
pub trait IotDevice {
    /// Handle one pulse of an IOT addressed to this device.
    ///
    /// Returning `false` leaves the instruction undefined, as if no device were attached.
    fn handle(&mut self, ctx: &mut IotContext<'_>, pulse: Pulse, completion: bool) -> bool;

    /// The machine transitioned from halted to running.
    fn start(&mut self) {}

    /// The machine halted.
    fn stop(&mut self) {}

    /// Periodic callback, see [`IotContext::set_poll_interval`].
    fn poll(&mut self, _ctx: &mut IotContext<'_>) {}
}
