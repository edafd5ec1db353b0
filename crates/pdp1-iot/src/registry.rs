use std::collections::HashMap;

use crate::{IotContext, IotDevice, IotError, Processor, Pulse, MAX_DEVICE};

/// Constructor for a device, invoked the first time an instruction addresses it.
pub type IotFactory = Box<dyn Fn() -> Result<Box<dyn IotDevice>, IotError>>;

enum Registration {
    Device(IotFactory),
    Alias(u8),
}

enum EntryState {
    Unresolved,
    /// Resolution failed; the number stays undefined for the life of the registry.
    Invalid,
    Resolved(Box<dyn IotDevice>),
    /// Shares the device resolved at the given number.
    Alias(u8),
}

struct IotEntry {
    state: EntryState,
    poll_interval: u32,
    cycles: u32,
}

impl IotEntry {
    fn new() -> Self {
        Self {
            state: EntryState::Unresolved,
            poll_interval: 0,
            cycles: 0,
        }
    }
}

/// Maps IOT device numbers to handlers and schedules their lifecycle and poll callbacks.
///
/// Devices are registered up front but only constructed when an instruction first addresses
/// them, so an unused device never opens files or sockets.
pub struct IotRegistry {
    registrations: HashMap<u8, Registration>,
    entries: Vec<IotEntry>,
    running: bool,
}

impl IotRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
            entries: (0..=MAX_DEVICE).map(|_| IotEntry::new()).collect(),
            running: false,
        }
    }

    /// Register a constructor for `device`.
    ///
    /// Registering over an existing number replaces the constructor, but has no effect on a
    /// number that has already been resolved.
    pub fn register<F>(&mut self, device: u8, factory: F)
    where
        F: Fn() -> Result<Box<dyn IotDevice>, IotError> + 'static,
    {
        assert!(device <= MAX_DEVICE, "IOT device {device:#o} out of range");
        self.registrations
            .insert(device, Registration::Device(Box::new(factory)));
    }

    /// Make `device` dispatch to the handler registered at `target`.
    ///
    /// Used by multi-number devices (e.g. the Type 23 drum answers on 61, 62 and 63).
    pub fn register_alias(&mut self, device: u8, target: u8) {
        assert!(device <= MAX_DEVICE, "IOT device {device:#o} out of range");
        assert!(target <= MAX_DEVICE, "IOT device {target:#o} out of range");
        self.registrations.insert(device, Registration::Alias(target));
    }

    pub fn is_resolved(&self, device: u8) -> bool {
        self.entries.get(usize::from(device)).is_some_and(|e| {
            matches!(e.state, EntryState::Resolved(_) | EntryState::Alias(_))
        })
    }

    pub fn is_invalid(&self, device: u8) -> bool {
        self.entries
            .get(usize::from(device))
            .is_some_and(|e| matches!(e.state, EntryState::Invalid))
    }

    /// Current poll interval of the device answering on `device` (0 when not polling).
    pub fn poll_interval(&self, device: u8) -> u32 {
        let idx = match self.entries.get(usize::from(device)).map(|e| &e.state) {
            Some(EntryState::Alias(target)) => usize::from(*target),
            Some(_) => usize::from(device),
            None => return 0,
        };
        self.entries[idx].poll_interval
    }

    /// Run one pulse of an IOT instruction addressed to `device`.
    ///
    /// Returns whether a handler processed the pulse. The first dispatch to a number resolves
    /// it; a failed resolution is permanent.
    pub fn dispatch(
        &mut self,
        cpu: &mut dyn Processor,
        device: u8,
        pulse: Pulse,
        completion: bool,
    ) -> bool {
        if device > MAX_DEVICE {
            return false;
        }

        let Some(idx) = self.resolve(device) else {
            return false;
        };

        // An IOT only executes on a running machine.
        if !self.running {
            self.set_running(true);
        }

        let entry = &mut self.entries[usize::from(idx)];
        let EntryState::Resolved(dev) = &mut entry.state else {
            return false;
        };
        let mut ctx = IotContext::new(cpu, device, &mut entry.poll_interval);
        dev.handle(&mut ctx, pulse, completion)
    }

    /// Notify devices of a run/halt transition. Repeated notifications are ignored.
    pub fn set_running(&mut self, running: bool) {
        if self.running == running {
            return;
        }
        self.running = running;

        for entry in &mut self.entries {
            if let EntryState::Resolved(dev) = &mut entry.state {
                if running {
                    dev.start();
                } else {
                    dev.stop();
                }
            }
        }
    }

    /// Advance one instruction cycle, polling every device whose interval has elapsed.
    pub fn tick(&mut self, cpu: &mut dyn Processor) {
        if !self.running {
            return;
        }

        for (device, entry) in self.entries.iter_mut().enumerate() {
            if entry.poll_interval == 0 {
                continue;
            }
            let IotEntry {
                state: EntryState::Resolved(dev),
                poll_interval,
                cycles,
            } = entry
            else {
                continue;
            };

            *cycles += 1;
            if *cycles >= *poll_interval {
                *cycles = 0;
                let mut ctx = IotContext::new(&mut *cpu, device as u8, poll_interval);
                dev.poll(&mut ctx);
            }
        }
    }

    /// Index of the entry that holds the handler for `device`, resolving it if needed.
    fn resolve(&mut self, device: u8) -> Option<u8> {
        match self.entries[usize::from(device)].state {
            EntryState::Resolved(_) => Some(device),
            EntryState::Alias(target) => Some(target),
            EntryState::Invalid => None,
            EntryState::Unresolved => match self.initialize(device) {
                Ok(idx) => Some(idx),
                Err(err) => {
                    tracing::debug!("{err}");
                    self.entries[usize::from(device)].state = EntryState::Invalid;
                    None
                }
            },
        }
    }

    fn initialize(&mut self, device: u8) -> Result<u8, IotError> {
        let target = match self.registrations.get(&device) {
            None => return Err(IotError::Unregistered(device)),
            Some(Registration::Alias(target)) => *target,
            Some(Registration::Device(factory)) => {
                let mut dev = factory()?;
                tracing::debug!(device, "IOT {device:02o} resolved");
                if self.running {
                    dev.start();
                }
                self.entries[usize::from(device)].state = EntryState::Resolved(dev);
                return Ok(device);
            }
        };

        let alias_err = IotError::AliasTarget {
            alias: device,
            target,
        };
        if target == device || !matches!(self.registrations.get(&target), Some(Registration::Device(_))) {
            return Err(alias_err);
        }

        match self.entries[usize::from(target)].state {
            EntryState::Resolved(_) => {}
            EntryState::Unresolved => {
                if let Err(err) = self.initialize(target) {
                    tracing::warn!("{err}");
                    self.entries[usize::from(target)].state = EntryState::Invalid;
                    return Err(alias_err);
                }
            }
            EntryState::Invalid | EntryState::Alias(_) => return Err(alias_err),
        }

        tracing::debug!(device, target, "IOT {device:02o} aliased to {target:02o}");
        self.entries[usize::from(device)].state = EntryState::Alias(target);
        Ok(target)
    }
}

impl Default for IotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct NullCpu {
        breaks: Vec<u8>,
    }

    impl Processor for NullCpu {
        fn io(&self) -> u32 {
            0
        }
        fn set_io(&mut self, _value: u32) {}
        fn instruction(&self) -> u32 {
            0
        }
        fn read_core(&self, _addr: u16) -> u32 {
            0
        }
        fn request_break(&mut self, line: u8) {
            self.breaks.push(line);
        }
        fn io_complete(&mut self) {}
        fn io_no_wait(&mut self) {}
    }

    struct Counting(Rc<RefCell<u32>>);

    impl IotDevice for Counting {
        fn handle(&mut self, _ctx: &mut IotContext<'_>, _pulse: Pulse, _completion: bool) -> bool {
            *self.0.borrow_mut() += 1;
            true
        }
    }

    #[test]
    fn factory_runs_once_per_device() {
        let built = Rc::new(RefCell::new(0u32));
        let handled = Rc::new(RefCell::new(0u32));
        let mut reg = IotRegistry::new();
        reg.register(0o22, {
            let built = built.clone();
            let handled = handled.clone();
            move || {
                *built.borrow_mut() += 1;
                Ok(Box::new(Counting(handled.clone())) as Box<dyn IotDevice>)
            }
        });

        let mut cpu = NullCpu::default();
        for _ in 0..3 {
            assert!(reg.dispatch(&mut cpu, 0o22, Pulse::Rising, false));
            assert!(reg.dispatch(&mut cpu, 0o22, Pulse::Falling, false));
        }
        assert_eq!(*built.borrow(), 1);
        assert_eq!(*handled.borrow(), 6);
    }

    #[test]
    fn out_of_range_device_is_not_handled() {
        let mut reg = IotRegistry::new();
        let mut cpu = NullCpu::default();
        assert!(!reg.dispatch(&mut cpu, 0o100, Pulse::Falling, false));
        assert!(!reg.is_invalid(0o100));
    }

    #[test]
    fn alias_to_alias_is_rejected() {
        let mut reg = IotRegistry::new();
        reg.register_alias(0o62, 0o63);
        reg.register_alias(0o63, 0o61);
        let mut cpu = NullCpu::default();
        assert!(!reg.dispatch(&mut cpu, 0o62, Pulse::Falling, false));
        assert!(reg.is_invalid(0o62));
    }

    #[test]
    fn self_alias_is_rejected() {
        let mut reg = IotRegistry::new();
        reg.register_alias(0o40, 0o40);
        let mut cpu = NullCpu::default();
        assert!(!reg.dispatch(&mut cpu, 0o40, Pulse::Rising, false));
        assert!(reg.is_invalid(0o40));
    }
}
