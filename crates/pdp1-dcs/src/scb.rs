//! SCB: channel configuration requests.
//!
//! The IO register holds the request in bits 12..14 and an operand in the low 12 bits. CLEAR
//! and OPEN take the core address of a request block:
//!
//! | word | contents                                                                      |
//! |------|-------------------------------------------------------------------------------|
//! | 0    | channel (bits 0..5), server 0100, break line 03600, IE, IOR, IOE, IOC, ECHO, FLEX, CRLF |
//! | 1    | TCP port                                                                      |
//! | 2    | client only: IPv4 address, high 16 bits                                       |
//! | 3    | client only: IPv4 address, low 16 bits                                        |
//!
//! REBIND takes a channel number, RESET no operand.

use std::net::{Ipv4Addr, SocketAddr};

use mio::net::TcpStream;
use pdp1_iot::IotContext;

use crate::channel::{Channel, Conditions, Phase};
use crate::dcs::Dcs;
use crate::error::DcsError;
use crate::interrupt::InterruptState;
use crate::poller::Source;

pub const CLEAR: u32 = 0;
pub const OPEN: u32 = 1;
pub const REBIND: u32 = 2;
pub const RESET: u32 = 4;

const OPERAND_MASK: u32 = 0o7777;

pub fn sub_op(io: u32) -> u32 {
    (io >> 12) & 0o7
}

/// Assemble an SCB IO word.
pub fn request(op: u32, operand: u32) -> u32 {
    ((op & 0o7) << 12) | (operand & OPERAND_MASK)
}

impl Dcs {
    pub(crate) fn manage_channel_block(&mut self, ctx: &mut IotContext<'_>) -> Result<(), DcsError> {
        let io = ctx.io();
        let operand = io & OPERAND_MASK;

        match sub_op(io) {
            CLEAR => {
                let idx = self.channel_index(ctx.read_core(operand as u16))?;
                self.reset_channel(idx);
            }
            OPEN => self.open_channel(ctx, operand as u16)?,
            REBIND => self.rebind_channel(operand)?,
            RESET => self.reset(ctx),
            op => return Err(DcsError::Illegal(op)),
        }

        ctx.set_io(0);
        Ok(())
    }

    fn open_channel(&mut self, ctx: &mut IotContext<'_>, block: u16) -> Result<(), DcsError> {
        let word0 = ctx.read_core(block);
        let idx = self.channel_index(word0)?;
        if self.channels[idx].is_open() {
            return Err(DcsError::AlreadyOpen);
        }

        let port = (ctx.read_core(block + 1) & 0xFFFF) as u16;
        let mut chan = Channel::new(idx);
        chan.configure(word0);

        let result = if chan.server {
            self.listen_on(&mut chan, port)
        } else {
            let high = ctx.read_core(block + 2) & 0xFFFF;
            let low = ctx.read_core(block + 3) & 0xFFFF;
            let addr = SocketAddr::from((Ipv4Addr::from((high << 16) | low), port));
            self.connect_to(&mut chan, addr)
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    channel = idx,
                    server = chan.server,
                    port,
                    line = chan.break_line,
                    requests = ?chan.requests,
                    "channel opened"
                );
                self.channels[idx] = chan;
                Ok(())
            }
            Err(err) => {
                self.fail_channel(idx, &err);
                Err(err)
            }
        }
    }

    fn listen_on(&mut self, chan: &mut Channel, port: u16) -> Result<(), DcsError> {
        let poller = self.poller.as_ref().ok_or(DcsError::Poller(None))?;
        let id = self.ports.acquire(port, poller)?;
        chan.port = Some(id);
        chan.phase = Phase::Listening;
        Ok(())
    }

    fn connect_to(&mut self, chan: &mut Channel, addr: SocketAddr) -> Result<(), DcsError> {
        let poller = self.poller.as_ref().ok_or(DcsError::Poller(None))?;
        let mut stream = TcpStream::connect(addr).map_err(|err| DcsError::socket(&err))?;
        poller
            .register(&mut stream, Source::Channel(chan.index), true)
            .map_err(|err| DcsError::socket(&err))?;
        chan.stream = Some(stream);
        chan.remote = Some(addr);
        chan.phase = Phase::Connecting;
        Ok(())
    }

    /// Drop a server channel's connection and listen again, keeping its configuration.
    fn rebind_channel(&mut self, operand: u32) -> Result<(), DcsError> {
        let idx = self.channel_index(operand)?;
        let chan = &mut self.channels[idx];
        if !chan.is_open() || !chan.server {
            let err = DcsError::NotServer;
            self.fail_channel(idx, &err);
            return Err(err);
        }

        chan.close_socket(self.poller.as_ref());
        chan.phase = Phase::Listening;
        chan.conditions = Conditions::empty();
        chan.interrupts = InterruptState::default();
        chan.send_shift = Default::default();
        chan.recv_shift = Default::default();
        self.arbiter.forget(idx);
        if self.current == Some(idx) {
            self.current = None;
        }
        tracing::debug!(channel = idx, "channel rebound");
        Ok(())
    }

    /// Close channel `idx` and return it to its initial state. Closed channels are left alone.
    pub(crate) fn reset_channel(&mut self, idx: usize) {
        let chan = &mut self.channels[idx];
        if !chan.is_open() {
            return;
        }

        chan.close_socket(self.poller.as_ref());
        if let (Some(id), Some(poller)) = (chan.port.take(), self.poller.as_ref()) {
            self.ports.release(id, poller);
        }
        self.channels[idx] = Channel::new(idx);

        self.arbiter.forget(idx);
        if self.current == Some(idx) {
            self.current = None;
        }
        if self.send_channel == Some(idx) {
            self.send_channel = None;
        }
        tracing::debug!(channel = idx, "channel reset");
    }

    /// Close everything and return to the uninitialized state.
    fn reset(&mut self, ctx: &mut IotContext<'_>) {
        ctx.set_poll_interval(0);
        for idx in 0..self.channels.len() {
            self.reset_channel(idx);
        }
        self.ports.release_all(self.poller.as_ref());
        self.poller = None;
        self.failed = None;
        self.current = None;
        self.send_channel = None;
        self.general_completion = false;
        self.arbiter.last = None;
        self.arbiter.enabled = self.config.priority_enabled;
        tracing::debug!("data control reset");
    }
}
