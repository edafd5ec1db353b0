use std::io;

use pdp1_iot::{IotContext, IotDevice, Pulse};

use crate::channel::{Channel, Conditions, Pending, Phase, Received, Requests};
use crate::command::Command;
use crate::config::DcsConfig;
use crate::error::DcsError;
use crate::flexo::{self, Shift, ASCII_NO_CHAR, FLEX_ERROR, FLEX_NO_CHAR};
use crate::interrupt::{Arbiter, Causes};
use crate::poller::Poller;
use crate::ports::PortRegistry;
use crate::scb;

/// RIC result when no channel has interrupted.
pub const NO_CHANNEL: u32 = 0o100;

/// RXL: translate Concise to ASCII (otherwise ASCII to Concise).
pub const RXL_FLEX: u32 = 0o400_000;
/// RXL: shift state, in and out.
pub const RXL_SHIFTED: u32 = 0o400;
/// RXL: set when the translation changed the shift state.
pub const RXL_CHANGE: u32 = 0o1000;

const FLEX_MASK: u32 = 0o77;
const BYTE_MASK: u32 = 0o377;

/// Socket-backed Type 30 data-control system answering on IOT 22.
pub struct Dcs {
    pub(crate) config: DcsConfig,
    /// `None` until first use and after an SCB RESET.
    pub(crate) poller: Option<Poller>,
    /// Set when the poller could not be created; every command reports it until RESET.
    pub(crate) failed: Option<DcsError>,
    pub(crate) channels: Vec<Channel>,
    pub(crate) ports: PortRegistry,
    pub(crate) arbiter: Arbiter,
    pub(crate) last_error: u32,
    /// Selected (locked) channel for RCH/RCR/TCC.
    pub(crate) current: Option<usize>,
    pub(crate) send_channel: Option<usize>,
    /// RWE is waiting for the next channel event.
    pub(crate) general_completion: bool,
}

impl Dcs {
    pub fn new(config: DcsConfig) -> Self {
        let count = config.channel_count();
        Self {
            poller: None,
            failed: None,
            channels: (0..count).map(Channel::new).collect(),
            ports: PortRegistry::new(count, config.listen_backlog),
            arbiter: Arbiter::new(config.priority_enabled),
            last_error: 0,
            current: None,
            send_channel: None,
            general_completion: false,
            config,
        }
    }

    fn ensure_initialized(&mut self, ctx: &mut IotContext<'_>) -> Result<(), DcsError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.poller.is_some() {
            return Ok(());
        }

        match Poller::new() {
            Ok(poller) => {
                self.poller = Some(poller);
                ctx.set_poll_interval(self.config.poll_interval);
                tracing::debug!(
                    channels = self.channels.len(),
                    poll_interval = self.config.poll_interval,
                    "data control initialized"
                );
                Ok(())
            }
            Err(err) => {
                let err = DcsError::Poller(err.raw_os_error());
                tracing::warn!("{err}; device disabled until reset");
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        ctx: &mut IotContext<'_>,
        cmd: Command,
        clear: bool,
        completion: bool,
    ) -> Result<(), DcsError> {
        let reset = cmd == Command::Scb && scb::sub_op(ctx.io()) == scb::RESET;
        if !reset {
            self.ensure_initialized(ctx)?;
        }

        match cmd {
            Command::Rch => self.receive(ctx, clear),
            Command::Rcr => {
                let result = self.receive(ctx, clear);
                self.release_current();
                result
            }
            Command::Rrc => {
                let idx = self.current.ok_or(DcsError::NoCurrent)?;
                ctx.set_io(idx as u32);
                Ok(())
            }
            Command::Rsc => {
                ctx.set_io(0);
                self.release_current();
                Ok(())
            }
            Command::Tcb => {
                let idx = self.send_channel.or(self.current);
                self.transmit(ctx, idx)
            }
            Command::Tcc => self.transmit(ctx, self.current),
            Command::Ssb => {
                self.send_channel = Some(self.channel_index(ctx.io())?);
                Ok(())
            }
            Command::Scb => self.manage_channel_block(ctx),
            Command::Rle => {
                ctx.set_io(self.last_error);
                self.last_error = 0;
                Ok(())
            }
            Command::Rpc => self.pending_count(ctx),
            Command::Rci => {
                let idx = self.channel_index(ctx.io())?;
                self.channels[idx].interrupts = Default::default();
                self.arbiter.forget(idx);
                Ok(())
            }
            Command::Ric => {
                let word = self.arbiter.last.map_or(NO_CHANNEL, |(idx, _)| idx as u32);
                ctx.set_io(word);
                Ok(())
            }
            Command::Rcs => {
                let idx = self.channel_index(ctx.io())?;
                let word = self.channels[idx]
                    .status(self.current == Some(idx), self.arbiter.causes_for(idx));
                ctx.set_io(word);
                Ok(())
            }
            Command::Rwe => {
                if completion {
                    self.general_completion = true;
                }
                Ok(())
            }
            Command::Roc => {
                let idx = self.channel_index(ctx.io())?;
                if !self.channels[idx].is_open() {
                    return Err(DcsError::NotOpen);
                }
                self.current = Some(idx);
                ctx.set_io(0);
                Ok(())
            }
            Command::Res => {
                let previous = u32::from(self.arbiter.enabled);
                self.arbiter.enabled = ctx.io() & 1 != 0;
                ctx.set_io(previous);
                Ok(())
            }
            Command::Rxl => {
                ctx.set_io(translate(ctx.io()));
                Ok(())
            }
        }
    }

    /// Range-check the channel number in the low 6 bits of `word`.
    pub(crate) fn channel_index(&self, word: u32) -> Result<usize, DcsError> {
        let idx = word & 0o77;
        if (idx as usize) < self.channels.len() {
            Ok(idx as usize)
        } else {
            Err(DcsError::BadChannel(idx))
        }
    }

    /// Record `err` against channel `idx` as well as the controller.
    pub(crate) fn fail_channel(&mut self, idx: usize, err: &DcsError) {
        let word = err.word();
        self.channels[idx].last_error = word;
        self.last_error = word;
    }

    pub(crate) fn raise(&mut self, ctx: &mut IotContext<'_>, idx: usize, cause: Causes) {
        self.arbiter.raise(ctx, &mut self.channels[idx], cause);
    }

    /// The peer went away (or the socket failed): close it and report the loss.
    pub(crate) fn lose_connection(
        &mut self,
        ctx: &mut IotContext<'_>,
        idx: usize,
        os: Option<i32>,
    ) {
        let chan = &mut self.channels[idx];
        chan.close_socket(self.poller.as_ref());
        chan.phase = Phase::Lost;
        tracing::debug!(channel = idx, "connection lost");

        self.fail_channel(idx, &DcsError::Lost(os));
        self.raise(ctx, idx, Causes::CONNECT);
    }

    /// Unlock the current channel and move on to the next one with input waiting.
    pub(crate) fn release_current(&mut self) {
        let start = self.current.take().map_or(0, |idx| idx + 1);
        let count = self.channels.len();
        self.current = (0..count).map(|i| (start + i) % count).find(|&idx| {
            let chan = &self.channels[idx];
            chan.is_open() && chan.is_read_ready()
        });
        if let Some(idx) = self.current {
            tracing::trace!(channel = idx, "current channel advanced");
        }
    }

    fn receive(&mut self, ctx: &mut IotContext<'_>, clear: bool) -> Result<(), DcsError> {
        let idx = self.current.ok_or(DcsError::NoCurrent)?;
        let chan = &mut self.channels[idx];
        let flex = chan.is_flex();
        let base = if clear {
            0
        } else if flex {
            ctx.io() & !FLEX_MASK
        } else {
            ctx.io() & !BYTE_MASK
        };

        let received = if let Some(byte) = chan.pushback.take() {
            Received::Byte(chan.translate_received(byte))
        } else if !chan.is_read_ready() {
            Received::Empty
        } else {
            match chan.recv_byte() {
                Received::Byte(byte) => {
                    chan.echo(byte);
                    Received::Byte(chan.translate_received(byte))
                }
                other => other,
            }
        };

        match received {
            Received::Byte(ch) => {
                ctx.set_io(base | u32::from(ch));
                self.settle_input(ctx, idx);
                Ok(())
            }
            Received::Empty => {
                self.settle_input(ctx, idx);
                if flex {
                    ctx.set_io(base | u32::from(FLEX_NO_CHAR));
                    Ok(())
                } else {
                    Err(DcsError::NoChar)
                }
            }
            Received::Closed(os) => {
                self.lose_connection(ctx, idx, os);
                if flex {
                    ctx.set_io(base | u32::from(FLEX_ERROR));
                    Ok(())
                } else {
                    Err(DcsError::Lost(os))
                }
            }
        }
    }

    /// Recompute read-ready after a receive; a drained socket whose peer has closed is lost.
    fn settle_input(&mut self, ctx: &mut IotContext<'_>, idx: usize) {
        let chan = &mut self.channels[idx];
        if !chan.is_connected() {
            chan.conditions.set(Conditions::READ_READY, chan.pushback.is_some());
            return;
        }
        if let Pending::Closed(os) = chan.refresh_read_ready() {
            if chan.pushback.is_none() {
                self.lose_connection(ctx, idx, os);
            }
        }
    }

    fn transmit(&mut self, ctx: &mut IotContext<'_>, idx: Option<usize>) -> Result<(), DcsError> {
        let idx = idx.ok_or(DcsError::NoCurrent)?;
        let chan = &mut self.channels[idx];
        if !chan.is_connected() {
            return Err(DcsError::NotConnected);
        }
        if chan.stream.is_none() {
            return Err(DcsError::NoCurrent);
        }
        if chan.conditions.contains(Conditions::FULL) {
            return Err(DcsError::Full);
        }

        let io = ctx.io();
        let byte = if chan.is_flex() {
            match flexo::decode((io & FLEX_MASK) as u8, &mut chan.send_shift) {
                Some(byte) => byte,
                // Shift codes and unprintable codes send nothing.
                None => {
                    ctx.set_io(0);
                    return Ok(());
                }
            }
        } else {
            (io & BYTE_MASK) as u8
        };

        let mut out = Vec::with_capacity(2);
        if byte == b'\n' && chan.requests.contains(Requests::CRLF) {
            out.push(b'\r');
        }
        out.push(byte);

        match chan.send(&out) {
            Ok(n) if n == out.len() => {
                ctx.set_io(0);
                Ok(())
            }
            Ok(n) => {
                chan.backlog.extend_from_slice(&out[n..]);
                self.send_full(ctx, idx)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                chan.backlog.extend_from_slice(&out);
                self.send_full(ctx, idx)
            }
            Err(err) => {
                tracing::debug!(channel = idx, "send failed: {err}");
                self.lose_connection(ctx, idx, err.raw_os_error());
                let err = DcsError::socket(&err);
                self.fail_channel(idx, &err);
                Err(err)
            }
        }
    }

    /// The socket took less than we offered; hold the rest until it drains.
    fn send_full(&mut self, ctx: &mut IotContext<'_>, idx: usize) -> Result<(), DcsError> {
        let chan = &mut self.channels[idx];
        chan.conditions.insert(Conditions::FULL);
        if let Some(poller) = &self.poller {
            if let Err(err) = chan.set_write_interest(poller, true) {
                tracing::warn!(channel = idx, "cannot watch for write space: {err}");
            }
        }
        self.raise(ctx, idx, Causes::ERROR);
        Err(DcsError::Full)
    }

    fn pending_count(&mut self, ctx: &mut IotContext<'_>) -> Result<(), DcsError> {
        let idx = self.current.ok_or(DcsError::NoCurrent)?;
        let chan = &self.channels[idx];
        if chan.stream.is_none() {
            return Err(DcsError::NoCurrent);
        }
        ctx.set_io(chan.available());
        Ok(())
    }
}

impl IotDevice for Dcs {
    fn handle(&mut self, ctx: &mut IotContext<'_>, pulse: Pulse, completion: bool) -> bool {
        if pulse == Pulse::Rising {
            return true;
        }

        let (code, clear) = Command::from_instruction(ctx.instruction());
        let Some(cmd) = Command::decode(code) else {
            tracing::debug!("IOT 22 command {code:02o} is not implemented");
            return false;
        };
        tracing::trace!(?cmd, "command, io {:06o}", ctx.io());

        if let Err(err) = self.execute(ctx, cmd, clear, completion) {
            tracing::debug!(?cmd, "{err}");
            let word = err.word();
            self.last_error = word;
            ctx.set_io(word);
        }

        if completion && !self.general_completion {
            ctx.complete();
        }
        true
    }

    fn poll(&mut self, ctx: &mut IotContext<'_>) {
        self.service(ctx);
    }
}

/// RXL: translate one character between Concise and ASCII.
pub fn translate(io: u32) -> u32 {
    let shifted = io & RXL_SHIFTED != 0;
    let mut shift = if shifted { Shift::Upper } else { Shift::Lower };

    let result = if io & RXL_FLEX != 0 {
        flexo::decode((io & FLEX_MASK) as u8, &mut shift).unwrap_or(ASCII_NO_CHAR)
    } else {
        flexo::encode((io & BYTE_MASK) as u8, &mut shift).unwrap_or(FLEX_NO_CHAR)
    };

    let now_shifted = shift == Shift::Upper;
    let mut word = io & !(RXL_SHIFTED | RXL_CHANGE | BYTE_MASK);
    if now_shifted {
        word |= RXL_SHIFTED;
    }
    if now_shifted != shifted {
        word |= RXL_CHANGE;
    }
    word | u32::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rxl_concise_to_ascii() {
        assert_eq!(translate(RXL_FLEX | 0o61), RXL_FLEX | u32::from(b'a'));
        assert_eq!(
            translate(RXL_FLEX | RXL_SHIFTED | 0o61),
            RXL_FLEX | RXL_SHIFTED | u32::from(b'A')
        );
        assert_eq!(translate(RXL_FLEX | 0o12), RXL_FLEX | u32::from(ASCII_NO_CHAR));
    }

    #[test]
    fn rxl_reports_shift_changes() {
        // Upper-case shift code while in lower case.
        assert_eq!(
            translate(RXL_FLEX | 0o74),
            RXL_FLEX | RXL_SHIFTED | RXL_CHANGE | u32::from(ASCII_NO_CHAR)
        );
        // ASCII 'A' from lower case yields the shift code first.
        assert_eq!(
            translate(u32::from(b'A')),
            RXL_SHIFTED | RXL_CHANGE | u32::from(flexo::UPPER_SHIFT)
        );
        assert_eq!(translate(RXL_SHIFTED | u32::from(b'A')), RXL_SHIFTED | 0o61);
    }

    #[test]
    fn rxl_clears_stale_change_bit() {
        assert_eq!(translate(RXL_CHANGE | u32::from(b'a')), 0o61);
        assert_eq!(translate(u32::from(b'$')), u32::from(FLEX_NO_CHAR));
    }

    #[test]
    fn auto_advance_skips_idle_channels() {
        let mut dcs = Dcs::new(DcsConfig::default().with_channels(4));
        for idx in [0, 2, 3] {
            dcs.channels[idx].phase = Phase::Connected;
        }
        dcs.channels[0].conditions = Conditions::READ_READY;
        dcs.channels[3].conditions = Conditions::READ_READY;

        dcs.current = Some(0);
        dcs.release_current();
        assert_eq!(dcs.current, Some(3));

        dcs.release_current();
        assert_eq!(dcs.current, Some(0));

        dcs.channels[0].conditions = Conditions::empty();
        dcs.channels[3].conditions = Conditions::empty();
        dcs.release_current();
        assert_eq!(dcs.current, None);
    }

    #[test]
    fn channel_numbers_are_range_checked() {
        let dcs = Dcs::new(DcsConfig::default().with_channels(4));
        assert_eq!(dcs.channel_index(0o777_703), Ok(3));
        assert_eq!(dcs.channel_index(4), Err(DcsError::BadChannel(4)));
    }
}
