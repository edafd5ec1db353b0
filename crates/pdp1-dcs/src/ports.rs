use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::DcsError;
use crate::poller::{Poller, Source};

/// Slot of a shared listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortId(pub usize);

struct PortEntry {
    port: u16,
    listener: TcpListener,
    count: usize,
    /// Readiness was reported but the accept queue has not been drained yet.
    accept_pending: bool,
}

/// Listening sockets shared by server channels on the same port.
pub struct PortRegistry {
    slots: Vec<Option<PortEntry>>,
    backlog: i32,
}

impl PortRegistry {
    pub fn new(capacity: usize, backlog: i32) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            backlog,
        }
    }

    /// Take a reference on the listener for `port`, creating it on first use.
    pub fn acquire(&mut self, port: u16, poller: &Poller) -> Result<PortId, DcsError> {
        if let Some(id) = self.lookup(port) {
            if let Some(entry) = self.slots[id.0].as_mut() {
                entry.count += 1;
                tracing::debug!(port, count = entry.count, "sharing listener");
            }
            return Ok(id);
        }

        // Never more ports than channels.
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(DcsError::Socket(None));
        };

        let mut listener = listen(port, self.backlog)?;
        poller
            .register(&mut listener, Source::Server(slot), false)
            .map_err(|err| DcsError::socket(&err))?;

        tracing::debug!(port, slot, local = ?listener.local_addr().ok(), "listening");
        self.slots[slot] = Some(PortEntry {
            port,
            listener,
            count: 1,
            accept_pending: false,
        });
        Ok(PortId(slot))
    }

    /// Drop one reference; the last one closes the listener.
    pub fn release(&mut self, id: PortId, poller: &Poller) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        let Some(entry) = slot.as_mut() else {
            return;
        };

        entry.count -= 1;
        if entry.count == 0 {
            if let Some(mut entry) = slot.take() {
                poller.deregister(&mut entry.listener);
                tracing::debug!(port = entry.port, "listener closed");
            }
        }
    }

    /// Close every listener regardless of reference counts.
    pub fn release_all(&mut self, poller: Option<&Poller>) {
        for slot in &mut self.slots {
            if let Some(mut entry) = slot.take() {
                if let Some(poller) = poller {
                    poller.deregister(&mut entry.listener);
                }
            }
        }
    }

    pub fn lookup(&self, port: u16) -> Option<PortId> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.port == port))
            .map(PortId)
    }

    pub fn mark_pending(&mut self, slot: usize) {
        if let Some(Some(entry)) = self.slots.get_mut(slot) {
            entry.accept_pending = true;
        }
    }

    /// Slots whose accept queue may hold connections.
    pub fn pending(&self) -> Vec<PortId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.as_ref().is_some_and(|e| e.accept_pending))
            .map(|(idx, _)| PortId(idx))
            .collect()
    }

    /// Accept one connection. `Ok(None)` once the queue is drained.
    pub fn accept(&mut self, id: PortId) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let Some(Some(entry)) = self.slots.get_mut(id.0) else {
            return Ok(None);
        };

        match entry.listener.accept() {
            Ok(conn) => Ok(Some(conn)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                entry.accept_pending = false;
                Ok(None)
            }
            Err(err) => {
                entry.accept_pending = false;
                Err(err)
            }
        }
    }
}

fn listen(port: u16, backlog: i32) -> Result<TcpListener, DcsError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| DcsError::socket(&err))?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    let bind = |socket: &Socket| -> io::Result<()> {
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)
    };
    bind(&socket).map_err(|err| DcsError::bind(port, &err))?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}
