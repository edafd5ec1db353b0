//! Per-tick socket servicing: accepts, connect completion, input arrival, hangups and
//! draining of send backlogs.

use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;
use pdp1_iot::IotContext;

use crate::channel::{Conditions, Pending, Phase};
use crate::dcs::Dcs;
use crate::error::DcsError;
use crate::interrupt::Causes;
use crate::poller::{Readiness, Source};
use crate::ports::PortId;

impl Dcs {
    /// Collect readiness and act on it. Runs from the device's poll callback.
    pub(crate) fn service(&mut self, ctx: &mut IotContext<'_>) {
        let Some(poller) = self.poller.as_mut() else {
            return;
        };
        let events = match poller.poll_now() {
            Ok(events) => events,
            Err(err) => {
                let err = DcsError::Poller(err.raw_os_error());
                tracing::warn!("{err}");
                self.last_error = err.word();
                return;
            }
        };

        let mut processed = !events.is_empty();
        let mut ready = vec![Readiness::default(); self.channels.len()];
        for (source, readiness) in events {
            tracing::trace!(?source, ?readiness, "ready");
            match source {
                Source::Server(slot) => self.ports.mark_pending(slot),
                Source::Channel(idx) => {
                    if let Some(slot) = ready.get_mut(idx) {
                        slot.merge(readiness);
                    }
                }
            }
        }

        for id in self.ports.pending() {
            processed |= self.accept_one(ctx, id);
        }
        for (idx, readiness) in ready.into_iter().enumerate() {
            if readiness.any() {
                self.channel_ready(ctx, idx, readiness);
            }
        }

        if processed && self.general_completion {
            self.general_completion = false;
            ctx.complete();
        }
    }

    /// Hand one queued connection on `id` to the first channel listening there.
    fn accept_one(&mut self, ctx: &mut IotContext<'_>, id: PortId) -> bool {
        let Some(idx) = self
            .channels
            .iter()
            .position(|chan| chan.phase == Phase::Listening && chan.port == Some(id))
        else {
            // Stays queued until a channel listens on this port again.
            return false;
        };

        match self.ports.accept(id) {
            Ok(Some((stream, addr))) => self.attach(ctx, idx, stream, addr),
            Ok(None) => {}
            Err(err) => self.socket_error(ctx, idx, &err),
        }
        true
    }

    fn attach(&mut self, ctx: &mut IotContext<'_>, idx: usize, mut stream: TcpStream, addr: SocketAddr) {
        let Some(poller) = self.poller.as_ref() else {
            return;
        };
        if let Err(err) = poller.register(&mut stream, Source::Channel(idx), false) {
            self.socket_error(ctx, idx, &err);
            return;
        }

        let chan = &mut self.channels[idx];
        chan.stream = Some(stream);
        chan.remote = Some(addr);
        chan.phase = Phase::Connected;
        chan.conditions = Conditions::empty();
        chan.send_shift = Default::default();
        chan.recv_shift = Default::default();
        tracing::debug!(channel = idx, %addr, "connection accepted");
        self.raise(ctx, idx, Causes::CONNECT);
    }

    fn socket_error(&mut self, ctx: &mut IotContext<'_>, idx: usize, err: &io::Error) {
        tracing::debug!(channel = idx, "socket error: {err}");
        self.channels[idx].conditions.insert(Conditions::SOCKET_ERROR);
        self.fail_channel(idx, &DcsError::socket(err));
        self.raise(ctx, idx, Causes::ERROR);
    }

    fn channel_ready(&mut self, ctx: &mut IotContext<'_>, idx: usize, readiness: Readiness) {
        match self.channels[idx].phase {
            Phase::Connecting => {
                if !self.finish_connect(ctx, idx) {
                    return;
                }
            }
            Phase::Connected => {}
            _ => return,
        }

        if readiness.error {
            let err = self.channels[idx]
                .stream
                .as_ref()
                .and_then(|stream| stream.take_error().ok().flatten())
                .unwrap_or_else(|| io::ErrorKind::Other.into());
            self.socket_error(ctx, idx, &err);
        }

        if readiness.writable && self.channels[idx].conditions.contains(Conditions::FULL) {
            match self.channels[idx].flush_backlog() {
                Ok(true) => {
                    let chan = &mut self.channels[idx];
                    chan.conditions.remove(Conditions::FULL);
                    if let Some(poller) = &self.poller {
                        if let Err(err) = chan.set_write_interest(poller, false) {
                            tracing::debug!(channel = idx, "cannot drop write interest: {err}");
                        }
                    }
                    self.raise(ctx, idx, Causes::READ);
                }
                Ok(false) => {}
                Err(err) => {
                    self.lose_connection(ctx, idx, err.raw_os_error());
                    return;
                }
            }
        }

        if readiness.readable || readiness.read_closed {
            let chan = &mut self.channels[idx];
            match chan.pending() {
                Pending::Bytes(_) => {
                    chan.conditions.insert(Conditions::READ_READY);
                    if self.current.is_none() {
                        self.current = Some(idx);
                    }
                    self.raise(ctx, idx, Causes::READ);
                }
                Pending::Closed(os) if chan.pushback.is_none() => {
                    self.lose_connection(ctx, idx, os);
                }
                Pending::Empty if readiness.read_closed && chan.pushback.is_none() => {
                    self.lose_connection(ctx, idx, None);
                }
                _ => {}
            }
        }
    }

    /// Resolve a non-blocking connect. Returns whether the channel is now connected.
    fn finish_connect(&mut self, ctx: &mut IotContext<'_>, idx: usize) -> bool {
        let Some(stream) = self.channels[idx].stream.as_ref() else {
            return false;
        };

        let outcome = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Err(err),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
                Err(err) => Err(err),
            },
        };

        match outcome {
            Ok(false) => false,
            Ok(true) => {
                let chan = &mut self.channels[idx];
                if let (Some(poller), Some(stream)) = (&self.poller, chan.stream.as_mut()) {
                    if let Err(err) = poller.reregister(stream, Source::Channel(idx), false) {
                        tracing::debug!(channel = idx, "cannot drop write interest: {err}");
                    }
                }
                chan.phase = Phase::Connected;
                tracing::debug!(channel = idx, remote = ?chan.remote, "connected");
                self.raise(ctx, idx, Causes::CONNECT);
                true
            }
            Err(err) => {
                tracing::debug!(channel = idx, "connect failed: {err}");
                let chan = &mut self.channels[idx];
                chan.close_socket(self.poller.as_ref());
                chan.phase = Phase::Lost;
                self.socket_error(ctx, idx, &err);
                false
            }
        }
    }
}
