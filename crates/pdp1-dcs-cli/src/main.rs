#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pdp1_dcs::channel::{status, Requests, REQ_SERVER};
use pdp1_dcs::command::instruction;
use pdp1_dcs::error::{ERR_FLAG, ERR_FULL};
use pdp1_dcs::{scb, Command, DcsConfig, DEVICE};
use pdp1_iot::{IotRegistry, Processor, Pulse};
use tracing_subscriber::EnvFilter;

// Request blocks live here in the stand-in core.
const BLOCK: u16 = 0o100;
const TICK_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Parser)]
#[command(
    name = "dcs-echo",
    version,
    about = "Echo every character received on the IOT 22 socket channels back to its sender"
)]
struct Args {
    /// TCP port shared by all server channels.
    ///
    /// Environment variable: `PDP1_DCS_PORT`.
    #[arg(long, env = "PDP1_DCS_PORT", default_value_t = 1030)]
    port: u16,

    /// Number of server channels to open (1..=63).
    ///
    /// Environment variable: `PDP1_DCS_CHANNELS`.
    #[arg(long, env = "PDP1_DCS_CHANNELS", default_value_t = 8)]
    channels: usize,

    /// Instruction cycles between socket polls.
    ///
    /// Environment variable: `PDP1_DCS_POLL_INTERVAL`.
    #[arg(long, env = "PDP1_DCS_POLL_INTERVAL", default_value_t = 20)]
    poll_interval: u32,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `PDP1_DCS_LOG`.
    #[arg(long, env = "PDP1_DCS_LOG", default_value = "info")]
    log_level: String,

    /// Stop after N poll ticks instead of running until killed.
    #[arg(long)]
    max_ticks: Option<u64>,
}

/// Just enough of a processor to issue IOTs: IO register, instruction and a little core.
#[derive(Default)]
struct Console {
    io: u32,
    mb: u32,
    core: HashMap<u16, u32>,
    breaks: u64,
}

impl Processor for Console {
    fn io(&self) -> u32 {
        self.io
    }

    fn set_io(&mut self, value: u32) {
        self.io = value;
    }

    fn instruction(&self) -> u32 {
        self.mb
    }

    fn read_core(&self, addr: u16) -> u32 {
        self.core.get(&addr).copied().unwrap_or(0)
    }

    fn request_break(&mut self, line: u8) {
        self.breaks += 1;
        tracing::trace!(line, "sequence break requested");
    }

    fn io_complete(&mut self) {}

    fn io_no_wait(&mut self) {}
}

struct Host {
    registry: IotRegistry,
    cpu: Console,
    poll_interval: u32,
}

impl Host {
    fn new(config: DcsConfig) -> Self {
        let poll_interval = config.poll_interval;
        let mut registry = IotRegistry::new();
        pdp1_dcs::register(&mut registry, config);
        Self {
            registry,
            cpu: Console::default(),
            poll_interval,
        }
    }

    fn exec(&mut self, cmd: Command, io: u32) -> Result<u32> {
        self.cpu.io = io;
        self.cpu.mb = instruction(cmd, false);
        let handled = self
            .registry
            .dispatch(&mut self.cpu, DEVICE, Pulse::Rising, false)
            && self
                .registry
                .dispatch(&mut self.cpu, DEVICE, Pulse::Falling, false);
        if !handled {
            bail!("IOT {DEVICE:02o} did not handle {cmd:?}");
        }
        Ok(self.cpu.io)
    }

    fn open_server(&mut self, channel: u32, port: u16) -> Result<u32> {
        let word0 = channel | REQ_SERVER | Requests::CRLF.bits();
        self.cpu.core.insert(BLOCK, word0);
        self.cpu.core.insert(BLOCK + 1, u32::from(port));
        self.exec(Command::Scb, scb::request(scb::OPEN, u32::from(BLOCK)))
    }

    fn tick(&mut self) {
        for _ in 0..self.poll_interval {
            self.registry.tick(&mut self.cpu);
        }
    }

    /// Put server channels whose client hung up back to listening.
    fn rebind_lost(&mut self, channels: u32) -> Result<()> {
        for chan in 0..channels {
            if self.exec(Command::Rcs, chan)? & status::LOST != 0 {
                tracing::info!(channel = chan, "client disconnected");
                self.exec(Command::Scb, scb::request(scb::REBIND, chan))?;
            }
        }
        Ok(())
    }

    /// Echo everything that is waiting, one character per current channel.
    fn echo_pending(&mut self) -> Result<()> {
        loop {
            let chan = self.exec(Command::Rrc, 0)?;
            if chan & ERR_FLAG != 0 {
                return Ok(());
            }

            self.exec(Command::Ssb, chan)?;
            let ch = self.exec(Command::Rcr, 0)?;
            if ch & ERR_FLAG != 0 {
                tracing::debug!(channel = chan, "receive failed: {ch:06o}");
                continue;
            }

            let sent = self.exec(Command::Tcb, ch)?;
            if sent & ERR_FULL != 0 {
                tracing::debug!(channel = chan, "send buffer full");
            } else if sent & ERR_FLAG != 0 {
                tracing::warn!(channel = chan, "send failed: {sent:06o}");
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log filter {:?}", args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DcsConfig::default()
        .with_channels(args.channels)
        .with_poll_interval(args.poll_interval.max(1));
    let channels = config.channel_count() as u32;
    let mut host = Host::new(config);

    for chan in 0..channels {
        let word = host.open_server(chan, args.port)?;
        if word & ERR_FLAG != 0 {
            bail!(
                "cannot open channel {chan} on port {}: error word {word:06o}",
                args.port
            );
        }
    }
    tracing::info!(port = args.port, channels, "dcs-echo listening");

    let mut ticks = 0u64;
    while args.max_ticks.map_or(true, |max| ticks < max) {
        host.tick();
        ticks += 1;

        host.echo_pending()?;
        host.rebind_lost(channels)?;
        thread::sleep(TICK_SLEEP);
    }

    tracing::info!(ticks, breaks = host.cpu.breaks, "stopping");
    Ok(())
}
