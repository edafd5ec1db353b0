use bitflags::bitflags;
use pdp1_iot::IotContext;

use crate::channel::{Channel, Requests};

bitflags! {
    /// Why a channel interrupted. Shares bit positions with the matching [`Requests`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Causes: u32 {
        const READ = Requests::ON_READ.bits();
        const ERROR = Requests::ON_ERROR.bits();
        const CONNECT = Requests::ON_CONNECT.bits();
    }
}

/// Per-channel interrupt bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptState {
    /// A break was requested and not yet acknowledged with RCI.
    pub issued: bool,
    pub in_flight: Causes,
    /// Causes that arrived while an interrupt was outstanding.
    pub queued: Causes,
}

/// At most one outstanding interrupt per channel; later causes are queued until RCI.
#[derive(Debug)]
pub struct Arbiter {
    /// Priority-system enable bit (RES).
    pub enabled: bool,
    /// Channel that last interrupted, with the causes it reported.
    pub last: Option<(usize, Causes)>,
}

impl Arbiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last: None,
        }
    }

    /// Whether `cause` may interrupt now. A cause arriving while an interrupt is outstanding
    /// is queued instead.
    pub fn can_post(&self, chan: &mut Channel, cause: Causes) -> bool {
        if !self.enabled || !chan.requests.contains(Requests::INTERRUPT) {
            return false;
        }
        if !chan.requests.contains(Requests::from_bits_truncate(cause.bits())) {
            return false;
        }

        let state = &mut chan.interrupts;
        if state.issued {
            if !state.in_flight.contains(cause) {
                state.queued |= cause;
            }
            return false;
        }
        true
    }

    pub fn post(&mut self, ctx: &mut IotContext<'_>, chan: &mut Channel, cause: Causes) {
        ctx.request_interrupt(chan.break_line);
        chan.interrupts.issued = true;
        chan.interrupts.in_flight |= cause;
        self.last = Some((chan.index, chan.interrupts.in_flight));
        tracing::debug!(
            channel = chan.index,
            line = chan.break_line,
            ?cause,
            "interrupt"
        );
    }

    /// Post `cause` if the channel accepts it.
    pub fn raise(&mut self, ctx: &mut IotContext<'_>, chan: &mut Channel, cause: Causes) {
        if self.can_post(chan, cause) {
            self.post(ctx, chan, cause);
        }
    }

    /// Causes to report for `index` in its status word.
    pub fn causes_for(&self, index: usize) -> Option<Causes> {
        match self.last {
            Some((idx, causes)) if idx == index => Some(causes),
            _ => None,
        }
    }

    /// Drop every reference to channel `index`.
    pub fn forget(&mut self, index: usize) {
        if matches!(self.last, Some((idx, _)) if idx == index) {
            self.last = None;
        }
    }
}
