use std::io;
use std::time::Duration;

use mio::event::Source as MioSource;
use mio::{Events, Interest, Poll, Token};

// Server sockets live above this tag, channel sockets below it.
const SERVER_TAG: usize = 0o100_000;
const EVENT_CAPACITY: usize = 64;

/// What a readiness event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Listening socket in the given port slot.
    Server(usize),
    /// Socket owned by the given channel.
    Channel(usize),
}

impl Source {
    fn token(self) -> Token {
        match self {
            Source::Server(slot) => Token(SERVER_TAG + slot),
            Source::Channel(idx) => Token(idx),
        }
    }

    fn from_token(token: Token) -> Self {
        if token.0 >= SERVER_TAG {
            Source::Server(token.0 - SERVER_TAG)
        } else {
            Source::Channel(token.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub error: bool,
}

impl Readiness {
    pub fn merge(&mut self, other: Readiness) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.read_closed |= other.read_closed;
        self.error |= other.error;
    }

    pub fn any(&self) -> bool {
        self.readable || self.writable || self.read_closed || self.error
    }
}

/// Zero-timeout readiness multiplexer over every socket the controller owns.
///
/// Readiness is edge-triggered: an event is reported once per state change, so consumers must
/// drain (or remember) what they were told.
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
        })
    }

    pub fn register<S: MioSource + ?Sized>(
        &self,
        socket: &mut S,
        source: Source,
        writable: bool,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .register(socket, source.token(), interest(writable))
    }

    /// Switch write interest on or off.
    pub fn reregister<S: MioSource + ?Sized>(
        &self,
        socket: &mut S,
        source: Source,
        writable: bool,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(socket, source.token(), interest(writable))
    }

    pub fn deregister<S: MioSource + ?Sized>(&self, socket: &mut S) {
        if let Err(err) = self.poll.registry().deregister(socket) {
            tracing::debug!("deregister failed: {err}");
        }
    }

    /// Collect whatever is ready right now without blocking.
    pub fn poll_now(&mut self) -> io::Result<Vec<(Source, Readiness)>> {
        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(err) => return Err(err),
        }

        Ok(self
            .events
            .iter()
            .map(|event| {
                let readiness = Readiness {
                    readable: event.is_readable(),
                    writable: event.is_writable(),
                    read_closed: event.is_read_closed(),
                    error: event.is_error(),
                };
                (Source::from_token(event.token()), readiness)
            })
            .collect())
    }
}

fn interest(writable: bool) -> Interest {
    if writable {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_separate_servers_from_channels() {
        for source in [Source::Server(0), Source::Server(62), Source::Channel(0), Source::Channel(62)] {
            assert_eq!(Source::from_token(source.token()), source);
        }
    }

    #[test]
    fn idle_poll_reports_nothing() {
        let mut poller = Poller::new().unwrap();
        assert!(poller.poll_now().unwrap().is_empty());
    }
}
