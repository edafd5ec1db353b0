use std::io;

use thiserror::Error;

/// General error flag; set in every error word.
pub const ERR_FLAG: u32 = 0o400_000;
/// A read found no character.
pub const ERR_NO_CHAR: u32 = 0o200_000;
/// A send could not be queued because the previous one is still pending.
pub const ERR_FULL: u32 = 0o100_000;
/// Bits 4..11 carry an OS error number.
pub const ERR_OS: u32 = 0o040_000;

const OS_CODE_SHIFT: u32 = 4;
const OS_CODE_MASK: u32 = 0o377;

/// Cause codes in the low nibble of an error word.
pub mod cause {
    pub const NOT_OPEN: u32 = 0o01;
    pub const ALREADY_OPEN: u32 = 0o02;
    pub const BAD_CHANNEL: u32 = 0o03;
    pub const NOT_SERVER: u32 = 0o04;
    pub const ILLEGAL: u32 = 0o05;
    pub const SOCKET: u32 = 0o06;
    pub const BIND: u32 = 0o07;
    pub const NO_CURRENT: u32 = 0o10;
    pub const LOST: u32 = 0o11;
    pub const POLLER: u32 = 0o12;
    pub const NOT_CONNECTED: u32 = 0o13;
}

/// Failure of a DCS command or of socket activity on a channel.
///
/// The processor only ever sees these as 18-bit error words ([`DcsError::word`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DcsError {
    #[error("channel is not open")]
    NotOpen,

    #[error("channel is already open")]
    AlreadyOpen,

    #[error("channel {0} does not exist")]
    BadChannel(u32),

    #[error("channel is not an open server channel")]
    NotServer,

    #[error("illegal channel request {0:o}")]
    Illegal(u32),

    #[error("socket operation failed (os error {0:?})")]
    Socket(Option<i32>),

    #[error("cannot listen on port {port} (os error {os:?})")]
    Bind { port: u16, os: Option<i32> },

    #[error("no current channel")]
    NoCurrent,

    #[error("connection lost (os error {0:?})")]
    Lost(Option<i32>),

    #[error("readiness poller failed (os error {0:?})")]
    Poller(Option<i32>),

    #[error("channel is not connected")]
    NotConnected,

    #[error("send buffer full")]
    Full,

    #[error("no character available")]
    NoChar,
}

impl DcsError {
    pub fn socket(err: &io::Error) -> Self {
        Self::Socket(err.raw_os_error())
    }

    pub fn bind(port: u16, err: &io::Error) -> Self {
        Self::Bind {
            port,
            os: err.raw_os_error(),
        }
    }

    /// The error word reported in the IO register.
    pub fn word(&self) -> u32 {
        let (cause, os) = match *self {
            DcsError::Full => return ERR_FLAG | ERR_FULL,
            DcsError::NoChar => return ERR_FLAG | ERR_NO_CHAR,
            DcsError::NotOpen => (cause::NOT_OPEN, None),
            DcsError::AlreadyOpen => (cause::ALREADY_OPEN, None),
            DcsError::BadChannel(_) => (cause::BAD_CHANNEL, None),
            DcsError::NotServer => (cause::NOT_SERVER, None),
            DcsError::Illegal(_) => (cause::ILLEGAL, None),
            DcsError::Socket(os) => (cause::SOCKET, os),
            DcsError::Bind { os, .. } => (cause::BIND, os),
            DcsError::NoCurrent => (cause::NO_CURRENT, None),
            DcsError::Lost(os) => (cause::LOST, os),
            DcsError::Poller(os) => (cause::POLLER, os),
            DcsError::NotConnected => (cause::NOT_CONNECTED, None),
        };

        let os = os.map_or(0, |code| {
            ERR_OS | (((code as u32) & OS_CODE_MASK) << OS_CODE_SHIFT)
        });
        ERR_FLAG | os | cause
    }
}
