#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use pdp1_dcs::channel::REQ_SERVER;
use pdp1_dcs::command::instruction;
use pdp1_dcs::{scb, Command, DcsConfig, DEVICE};
use pdp1_iot::{IotRegistry, Processor, Pulse};

/// Where tests put SCB request blocks.
pub const BLOCK: u16 = 0o100;

#[derive(Default)]
pub struct TestCpu {
    pub io: u32,
    pub mb: u32,
    pub core: HashMap<u16, u32>,
    pub breaks: Vec<u8>,
    pub completions: u32,
}

impl Processor for TestCpu {
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
        self.breaks.push(line);
    }
    fn io_complete(&mut self) {
        self.completions += 1;
    }
    fn io_no_wait(&mut self) {}
}

/// A processor with the controller attached at IOT 22.
pub struct Machine {
    pub registry: IotRegistry,
    pub cpu: TestCpu,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_config(DcsConfig::default())
    }

    pub fn with_config(config: DcsConfig) -> Self {
        let mut registry = IotRegistry::new();
        pdp1_dcs::register(&mut registry, config);
        Self {
            registry,
            cpu: TestCpu::default(),
        }
    }

    /// Run `cmd` with `io` in the IO register; returns the resulting IO register.
    pub fn exec(&mut self, cmd: Command, io: u32) -> u32 {
        self.exec_with(cmd, io, false, false)
    }

    pub fn exec_with(&mut self, cmd: Command, io: u32, clear: bool, completion: bool) -> u32 {
        self.cpu.io = io;
        self.cpu.mb = instruction(cmd, clear);
        assert!(self
            .registry
            .dispatch(&mut self.cpu, DEVICE, Pulse::Rising, completion));
        assert!(self
            .registry
            .dispatch(&mut self.cpu, DEVICE, Pulse::Falling, completion));
        self.cpu.io
    }

    /// One poll interval's worth of cycles.
    pub fn poll(&mut self) {
        for _ in 0..self.registry.poll_interval(DEVICE).max(1) {
            self.registry.tick(&mut self.cpu);
        }
    }

    /// Poll until `done` holds, failing after a couple of seconds.
    pub fn wait_for(&mut self, what: &str, mut done: impl FnMut(&mut Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            self.poll();
            if done(self) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Issue an SCB OPEN with the given request block.
    pub fn open(&mut self, block: &[u32]) -> u32 {
        for (offset, word) in block.iter().enumerate() {
            self.cpu.core.insert(BLOCK + offset as u16, *word);
        }
        self.exec(Command::Scb, scb::request(scb::OPEN, u32::from(BLOCK)))
    }

    pub fn open_server(&mut self, channel: u32, port: u16, flags: u32) -> u32 {
        self.open(&[channel | REQ_SERVER | flags, u32::from(port)])
    }

    /// SCB CLEAR of `channel`.
    pub fn clear(&mut self, channel: u32) -> u32 {
        self.cpu.core.insert(BLOCK, channel);
        self.exec(Command::Scb, scb::request(scb::CLEAR, u32::from(BLOCK)))
    }

    pub fn status(&mut self, channel: u32) -> u32 {
        self.exec(Command::Rcs, channel)
    }

    pub fn wait_for_status(&mut self, channel: u32, bits: u32) {
        self.wait_for(&format!("channel {channel} status {bits:o}"), |m| {
            m.status(channel) & bits == bits
        });
    }
}

/// Break line field of request block word 0.
pub fn line(n: u32) -> u32 {
    n << 7
}

/// A port nothing is listening on (at the time of the call).
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

pub fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}
