use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use bitflags::bitflags;
use mio::net::TcpStream;

use crate::flexo::{self, Shift, FLEX_NO_CHAR};
use crate::interrupt::{Causes, InterruptState};
use crate::poller::{Poller, Source};
use crate::ports::PortId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Listening,
    Connecting,
    Connected,
    /// The remote end went away; the channel stays open until reset.
    Lost,
}

bitflags! {
    /// What the program asked for when it opened the channel.
    ///
    /// Bit positions are those of word 0 of an SCB request block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Requests: u32 {
        const INTERRUPT = 0o004_000;
        const ON_READ = 0o010_000;
        const ON_ERROR = 0o020_000;
        const ON_CONNECT = 0o040_000;
        const ECHO = 0o100_000;
        const FLEX = 0o200_000;
        const CRLF = 0o400_000;
    }
}

bitflags! {
    /// Socket conditions, at their status word positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Conditions: u32 {
        const FULL = 0o010;
        const READ_READY = 0o020;
        const SOCKET_ERROR = 0o040;
    }
}

/// Request block word 0: channel number.
pub const REQ_CHANNEL: u32 = 0o77;
/// Request block word 0: open as a server.
pub const REQ_SERVER: u32 = 0o100;
const REQ_LINE_MASK: u32 = 0o3600;
const REQ_LINE_SHIFT: u32 = 7;

pub mod status {
    pub const OPEN: u32 = 0o001;
    pub const SERVER: u32 = 0o002;
    pub const CONNECTED: u32 = 0o004;
    pub const LOST: u32 = 0o100;
    pub const INTERRUPT_ENABLED: u32 = 0o200;
    pub const ON_READ: u32 = 0o400;
    pub const ON_ERROR: u32 = 0o1000;
    pub const ON_CONNECT: u32 = 0o2000;
    pub const CURRENT: u32 = 0o4000;
}

// Enough to tell whether input is waiting.
const PEEK_WINDOW: usize = 4096;

/// Largest byte count RPC reports.
pub const MAX_AVAILABLE: u32 = 0o777_777;

/// Receive buffer state, as seen by a peek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Bytes(usize),
    Empty,
    /// The peer closed its side, or the socket failed.
    Closed(Option<i32>),
}

/// Result of receiving a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Byte(u8),
    Empty,
    /// End of stream or a socket error.
    Closed(Option<i32>),
}

pub struct Channel {
    pub index: usize,
    pub phase: Phase,
    pub server: bool,
    pub requests: Requests,
    pub conditions: Conditions,
    pub stream: Option<TcpStream>,
    pub port: Option<PortId>,
    pub remote: Option<SocketAddr>,
    pub break_line: u8,
    pub interrupts: InterruptState,
    /// Last error word for this channel. Unlike the controller's, never drained.
    pub last_error: u32,
    pub send_shift: Shift,
    pub recv_shift: Shift,
    /// Received byte held back while its shift code is delivered.
    pub pushback: Option<u8>,
    /// Bytes a partial write left behind.
    pub backlog: Vec<u8>,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            phase: Phase::Closed,
            server: false,
            requests: Requests::empty(),
            conditions: Conditions::empty(),
            stream: None,
            port: None,
            remote: None,
            break_line: 0,
            interrupts: InterruptState::default(),
            last_error: 0,
            send_shift: Shift::Lower,
            recv_shift: Shift::Lower,
            pushback: None,
            backlog: Vec::new(),
        }
    }

    /// Apply word 0 of a request block.
    pub fn configure(&mut self, word: u32) {
        self.server = word & REQ_SERVER != 0;
        self.break_line = ((word & REQ_LINE_MASK) >> REQ_LINE_SHIFT) as u8;
        self.requests = Requests::from_bits_truncate(word);
    }

    pub fn is_open(&self) -> bool {
        self.phase != Phase::Closed
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn is_flex(&self) -> bool {
        self.requests.contains(Requests::FLEX)
    }

    pub fn is_read_ready(&self) -> bool {
        self.conditions.contains(Conditions::READ_READY)
    }

    /// Status word as reported by RCS.
    ///
    /// `causes` is the in-flight set when this channel was the last to interrupt.
    pub fn status(&self, current: bool, causes: Option<Causes>) -> u32 {
        if !self.is_open() {
            return if current { status::CURRENT } else { 0 };
        }

        let mut word = status::OPEN | self.conditions.bits();
        if self.server {
            word |= status::SERVER;
        }
        match self.phase {
            Phase::Connected => word |= status::CONNECTED,
            Phase::Lost => word |= status::LOST,
            _ => {}
        }
        if self.requests.contains(Requests::INTERRUPT) {
            word |= status::INTERRUPT_ENABLED;
        }
        if let Some(causes) = causes {
            if causes.contains(Causes::READ) {
                word |= status::ON_READ;
            }
            if causes.contains(Causes::ERROR) {
                word |= status::ON_ERROR;
            }
            if causes.contains(Causes::CONNECT) {
                word |= status::ON_CONNECT;
            }
        }
        if current {
            word |= status::CURRENT;
        }
        word
    }

    pub fn recv_byte(&mut self) -> Received {
        let Some(stream) = self.stream.as_mut() else {
            return Received::Closed(None);
        };

        let mut buf = [0u8; 1];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return Received::Closed(None),
                Ok(_) => return Received::Byte(buf[0]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Received::Empty,
                Err(err) => return Received::Closed(err.raw_os_error()),
            }
        }
    }

    /// Echo a received byte back to the sender, if requested. A byte the socket will not
    /// take is dropped; real failures are left for the next read to discover.
    pub fn echo(&mut self, byte: u8) {
        if !self.requests.contains(Requests::ECHO) {
            return;
        }
        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = stream.write(&[byte]) {
                tracing::trace!(channel = self.index, "echo dropped: {err}");
            }
        }
    }

    /// Convert a received ASCII byte to the IO register value.
    pub fn translate_received(&mut self, byte: u8) -> u8 {
        if !self.is_flex() {
            return byte;
        }
        if byte == b'\n' {
            return FLEX_NO_CHAR;
        }

        match flexo::encode(byte, &mut self.recv_shift) {
            None => FLEX_NO_CHAR,
            Some(code) if flexo::is_shift(code) => {
                self.pushback = Some(byte);
                code
            }
            Some(code) => code,
        }
    }

    /// What a peek at the receive buffer shows.
    pub fn pending(&self) -> Pending {
        let Some(stream) = self.stream.as_ref() else {
            return Pending::Closed(None);
        };
        let mut buf = [0u8; PEEK_WINDOW];
        match stream.peek(&mut buf) {
            Ok(0) => Pending::Closed(None),
            Ok(n) => Pending::Bytes(n),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Pending::Empty
            }
            Err(err) => Pending::Closed(err.raw_os_error()),
        }
    }

    /// Bytes waiting in the receive buffer, capped at [`MAX_AVAILABLE`].
    pub fn available(&self) -> u32 {
        let Some(stream) = self.stream.as_ref() else {
            return 0;
        };
        let mut buf = vec![0u8; MAX_AVAILABLE as usize + 1];
        loop {
            match stream.peek(&mut buf) {
                Ok(n) => return (n as u32).min(MAX_AVAILABLE),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return 0,
            }
        }
    }

    /// Recompute read-ready after consuming input.
    pub fn refresh_read_ready(&mut self) -> Pending {
        let pending = self.pending();
        let ready = self.pushback.is_some() || matches!(pending, Pending::Bytes(_));
        self.conditions.set(Conditions::READ_READY, ready);
        pending
    }

    /// Write as much of `bytes` as the socket takes.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && written > 0 => break,
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    /// Push the send backlog out. Returns whether it is now empty.
    pub fn flush_backlog(&mut self) -> io::Result<bool> {
        if self.backlog.is_empty() {
            return Ok(true);
        }
        let pending = std::mem::take(&mut self.backlog);
        match self.send(&pending) {
            Ok(n) => {
                self.backlog = pending[n..].to_vec();
                Ok(self.backlog.is_empty())
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.backlog = pending;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn set_write_interest(&mut self, poller: &Poller, writable: bool) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => poller.reregister(stream, Source::Channel(self.index), writable),
            None => Ok(()),
        }
    }

    /// Deregister and close the connection socket, if any.
    pub fn close_socket(&mut self, poller: Option<&Poller>) {
        if let Some(mut stream) = self.stream.take() {
            if let Some(poller) = poller {
                poller.deregister(&mut stream);
            }
            let _ = stream.shutdown(Shutdown::Write);
        }
        self.remote = None;
        self.conditions.remove(Conditions::FULL | Conditions::READ_READY);
        self.pushback = None;
        self.backlog.clear();
    }
}
