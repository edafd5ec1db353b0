use std::cell::RefCell;
use std::rc::Rc;

use pdp1_iot::{IotContext, IotDevice, IotError, IotRegistry, Processor, Pulse};

#[derive(Default)]
struct TestCpu {
    io: u32,
    breaks: Vec<u8>,
    completions: u32,
}

impl Processor for TestCpu {
    fn io(&self) -> u32 {
        self.io
    }
    fn set_io(&mut self, value: u32) {
        self.io = value;
    }
    fn instruction(&self) -> u32 {
        0
    }
    fn read_core(&self, _addr: u16) -> u32 {
        0
    }
    fn request_break(&mut self, line: u8) {
        self.breaks.push(line);
    }
    fn io_complete(&mut self) {
        self.completions += 1;
    }
    fn io_no_wait(&mut self) {}
}

#[derive(Debug, Default)]
struct Log {
    events: Vec<String>,
}

/// Records every callback; requests a break on the falling pulse and polls every 3 cycles.
struct Recorder {
    log: Rc<RefCell<Log>>,
    interval: u32,
}

impl IotDevice for Recorder {
    fn handle(&mut self, ctx: &mut IotContext<'_>, pulse: Pulse, completion: bool) -> bool {
        self.log
            .borrow_mut()
            .events
            .push(format!("handle {:02o} {pulse:?}", ctx.device()));
        if pulse == Pulse::Falling {
            ctx.set_poll_interval(self.interval);
            ctx.request_interrupt(5);
            if completion {
                ctx.complete();
            }
        }
        true
    }

    fn start(&mut self) {
        self.log.borrow_mut().events.push("start".into());
    }

    fn stop(&mut self) {
        self.log.borrow_mut().events.push("stop".into());
    }

    fn poll(&mut self, ctx: &mut IotContext<'_>) {
        self.log.borrow_mut().events.push("poll".into());
        let io = ctx.io();
        ctx.set_io(io + 1);
    }
}

fn recorder_registry(log: &Rc<RefCell<Log>>, interval: u32) -> IotRegistry {
    let mut reg = IotRegistry::new();
    let log = log.clone();
    reg.register(0o61, move || {
        Ok(Box::new(Recorder {
            log: log.clone(),
            interval,
        }) as Box<dyn IotDevice>)
    });
    reg
}

fn count(log: &Rc<RefCell<Log>>, what: &str) -> usize {
    log.borrow().events.iter().filter(|e| *e == what).count()
}

#[test]
fn unknown_device_is_permanently_invalid() {
    let attempts = Rc::new(RefCell::new(0u32));
    let mut reg = IotRegistry::new();
    reg.register(0o33, {
        let attempts = attempts.clone();
        move || {
            *attempts.borrow_mut() += 1;
            Err(IotError::Init {
                device: 0o33,
                reason: "no hardware".into(),
            })
        }
    });

    let mut cpu = TestCpu::default();
    assert!(!reg.dispatch(&mut cpu, 0o33, Pulse::Rising, false));
    assert!(!reg.dispatch(&mut cpu, 0o33, Pulse::Falling, false));
    assert!(!reg.dispatch(&mut cpu, 0o33, Pulse::Rising, false));
    assert!(reg.is_invalid(0o33));
    assert_eq!(*attempts.borrow(), 1);

    assert!(!reg.dispatch(&mut cpu, 0o34, Pulse::Rising, false));
    assert!(reg.is_invalid(0o34));
}

#[test]
fn both_pulses_reach_the_device_and_breaks_are_forwarded() {
    let log = Rc::new(RefCell::new(Log::default()));
    let mut reg = recorder_registry(&log, 0);
    let mut cpu = TestCpu::default();

    assert!(reg.dispatch(&mut cpu, 0o61, Pulse::Rising, true));
    assert!(reg.dispatch(&mut cpu, 0o61, Pulse::Falling, true));

    assert!(reg.is_resolved(0o61));
    assert_eq!(cpu.breaks, vec![5]);
    assert_eq!(cpu.completions, 1);
    assert_eq!(
        log.borrow().events,
        vec!["start", "handle 61 Rising", "handle 61 Falling"]
    );
}

#[test]
fn alias_shares_the_target_device() {
    let log = Rc::new(RefCell::new(Log::default()));
    let built = Rc::new(RefCell::new(0u32));
    let mut reg = IotRegistry::new();
    reg.register(0o61, {
        let log = log.clone();
        let built = built.clone();
        move || {
            *built.borrow_mut() += 1;
            Ok(Box::new(Recorder {
                log: log.clone(),
                interval: 0,
            }) as Box<dyn IotDevice>)
        }
    });
    reg.register_alias(0o62, 0o61);
    reg.register_alias(0o63, 0o61);

    let mut cpu = TestCpu::default();
    assert!(reg.dispatch(&mut cpu, 0o62, Pulse::Falling, false));
    assert!(reg.dispatch(&mut cpu, 0o63, Pulse::Falling, false));
    assert!(reg.dispatch(&mut cpu, 0o61, Pulse::Falling, false));

    assert_eq!(*built.borrow(), 1);
    assert_eq!(count(&log, "start"), 1);
    assert_eq!(
        log.borrow().events[1..],
        ["handle 62 Falling", "handle 63 Falling", "handle 61 Falling"]
    );
}

#[test]
fn alias_to_missing_target_is_invalid() {
    let mut reg = IotRegistry::new();
    reg.register_alias(0o62, 0o61);
    let mut cpu = TestCpu::default();
    assert!(!reg.dispatch(&mut cpu, 0o62, Pulse::Falling, false));
    assert!(reg.is_invalid(0o62));
}

#[test]
fn start_and_stop_run_once_per_transition() {
    let log = Rc::new(RefCell::new(Log::default()));
    let mut reg = recorder_registry(&log, 0);
    let mut cpu = TestCpu::default();

    // Resolve the device, which also starts the machine.
    reg.dispatch(&mut cpu, 0o61, Pulse::Falling, false);
    assert_eq!(count(&log, "start"), 1);

    reg.set_running(true);
    assert_eq!(count(&log, "start"), 1);

    reg.set_running(false);
    reg.set_running(false);
    assert_eq!(count(&log, "stop"), 1);

    reg.set_running(true);
    assert_eq!(count(&log, "start"), 2);
}

#[test]
fn polling_follows_the_requested_interval() {
    let log = Rc::new(RefCell::new(Log::default()));
    let mut reg = recorder_registry(&log, 3);
    let mut cpu = TestCpu::default();

    // No polling before the device asks for it.
    reg.set_running(true);
    for _ in 0..10 {
        reg.tick(&mut cpu);
    }
    assert_eq!(count(&log, "poll"), 0);

    reg.dispatch(&mut cpu, 0o61, Pulse::Falling, false);
    assert_eq!(reg.poll_interval(0o61), 3);
    for _ in 0..9 {
        reg.tick(&mut cpu);
    }
    assert_eq!(count(&log, "poll"), 3);
    assert_eq!(cpu.io, 3);

    // Halted machines do not poll.
    reg.set_running(false);
    for _ in 0..9 {
        reg.tick(&mut cpu);
    }
    assert_eq!(count(&log, "poll"), 3);
}

#[test]
fn breaks_on_nonexistent_lines_are_dropped() {
    struct Wild;
    impl IotDevice for Wild {
        fn handle(&mut self, ctx: &mut IotContext<'_>, _pulse: Pulse, _completion: bool) -> bool {
            ctx.request_interrupt(15);
            ctx.request_interrupt(16);
            true
        }
    }

    let mut reg = IotRegistry::new();
    reg.register(0o57, || Ok(Box::new(Wild) as Box<dyn IotDevice>));
    let mut cpu = TestCpu::default();
    reg.dispatch(&mut cpu, 0o57, Pulse::Falling, false);
    assert_eq!(cpu.breaks, vec![15]);
}
