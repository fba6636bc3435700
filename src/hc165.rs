//! Driver for a chain of 74HC165 input shift registers.
//!
//! Inputs are polled from `tick` at a fixed interval: the parallel-load latch
//! is pulsed, the chain is clocked in over the bus and every changed bit is
//! reported through the injected callback. The inputs carry pull-ups, so the
//! callback receives the inverted level (`true` = contact closed).

use embedded_hal::digital::v2::OutputPin;
use embedded_time::duration::Milliseconds;
use heapless::{ArrayLength, Vec};

use crate::bus::{BusConfig, Transport};
use crate::chip_select::ChipSelect;
use crate::device::Device;

/// Poll interval for the input chain.
const POLL_INTERVAL_MS: u32 = 25;

pub struct Hc165<CS, L, F, N>
where
    CS: OutputPin,
    L: OutputPin,
    F: FnMut(u8, u8, bool),
    N: ArrayLength<u8>,
{
    cs: ChipSelect<CS>,
    latch: L,
    config: BusConfig,
    data_new: Vec<u8, N>,
    data_old: Vec<u8, N>,
    last_poll: Milliseconds,
    on_change: Option<F>,
}

impl<CS, L, F, N> Hc165<CS, L, F, N>
where
    CS: OutputPin,
    L: OutputPin,
    F: FnMut(u8, u8, bool),
    N: ArrayLength<u8>,
{
    /// The load latch idles high; pulling it low captures the parallel
    /// inputs.
    pub fn new(cs_pin: CS, mut latch_pin: L, spi_prescaler: u32) -> Self {
        latch_pin.set_high().ok();
        let mut data_new = Vec::new();
        data_new.resize(data_new.capacity(), 0x00).ok();
        let mut data_old = Vec::new();
        data_old.resize(data_old.capacity(), 0x00).ok();
        Self {
            cs: ChipSelect::new(cs_pin),
            latch: latch_pin,
            config: BusConfig::new(spi_prescaler),
            data_new,
            data_old,
            last_poll: Milliseconds(0u32),
            on_change: None,
        }
    }

    /// Install the change callback: `(device, pin, state)` per changed bit,
    /// with `state` already inverted for the pull-up wiring.
    pub fn set_callback(&mut self, on_change: F) {
        self.on_change = Some(on_change);
    }

    /// Capture and read the whole chain now, reporting changed bits.
    pub fn read<T: Transport>(&mut self, bus: &mut T) -> Result<(), T::Error> {
        self.capture(bus)?;

        let on_change = match self.on_change.as_mut() {
            Some(on_change) => on_change,
            None => return Ok(()),
        };
        for (i, (new, old)) in self.data_new.iter().zip(self.data_old.iter()).enumerate() {
            if new == old {
                continue;
            }
            for pin in 0..8 {
                let n = (new >> pin) & 0x01;
                if n == (old >> pin) & 0x01 {
                    continue;
                }
                on_change(i as u8, pin, n == 0);
            }
        }
        Ok(())
    }

    /// Raw (non-inverted) latched level by flat index (`device * 8 + pin`).
    pub fn get_state(&self, index: u8) -> bool {
        self.get_pin_state(index / 8, index % 8)
    }

    pub fn get_pin_state(&self, device: u8, pin: u8) -> bool {
        if usize::from(device) >= self.data_new.len() || pin >= 8 {
            return false;
        }
        (self.data_new[usize::from(device)] >> pin) & 0x01 != 0
    }

    fn capture<T: Transport>(&mut self, bus: &mut T) -> Result<(), T::Error> {
        self.latch.set_low().ok();
        self.data_old.clone_from(&self.data_new);
        self.latch.set_high().ok();

        let mut selected = self.cs.select(bus, &self.config);
        selected.receive(&mut self.data_new)
    }
}

impl<CS, L, F, N, T> Device<T> for Hc165<CS, L, F, N>
where
    CS: OutputPin,
    L: OutputPin,
    F: FnMut(u8, u8, bool),
    N: ArrayLength<u8>,
    T: Transport,
{
    /// Take the first snapshot and report every input's initial level.
    fn init(&mut self, bus: &mut T) {
        for byte in self.data_new.iter_mut() {
            *byte = 0x00;
        }
        if self.capture(bus).is_err() {
            log::warn!("hc165 initial capture failed");
            return;
        }
        if let Some(on_change) = self.on_change.as_mut() {
            for (i, new) in self.data_new.iter().enumerate() {
                for pin in 0..8 {
                    on_change(i as u8, pin, (new >> pin) & 0x01 == 0);
                }
            }
        }
    }

    fn tick(&mut self, bus: &mut T, now: Milliseconds) {
        if now.0.wrapping_sub(self.last_poll.0) <= POLL_INTERVAL_MS {
            return;
        }
        self.last_poll = now;
        if self.read(bus).is_err() {
            log::warn!("hc165 poll failed");
        }
    }

    fn deselect(&mut self) {
        self.cs.deselect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptBus, TestPin};
    use core::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec as StdVec;

    type Events = Rc<RefCell<StdVec<(u8, u8, bool)>>>;

    fn chain(events: &Events) -> Hc165<TestPin, TestPin, impl FnMut(u8, u8, bool), heapless::consts::U2> {
        let sink = events.clone();
        let mut chain = Hc165::new(TestPin::new(), TestPin::new(), 16);
        chain.set_callback(move |device, pin, state| {
            sink.borrow_mut().push((device, pin, state));
        });
        chain
    }

    #[test]
    fn init_reports_every_input_inverted() {
        let events: Events = Rc::new(RefCell::new(StdVec::new()));
        let mut chain = chain(&events);
        let mut bus = ScriptBus::new();
        bus.push_rx(&[0xFF, 0xFE]);

        chain.init(&mut bus);

        let events = events.borrow();
        assert_eq!(events.len(), 16);
        // all pulled-up inputs read high -> reported released, except the one
        // grounded pin of the second register
        assert!(events[..8].iter().all(|(d, _, state)| *d == 0 && !*state));
        assert_eq!(events[8], (1, 0, true));
        assert!(events[9..].iter().all(|(_, _, state)| !*state));
    }

    #[test]
    fn only_changed_bits_are_reported() {
        let events: Events = Rc::new(RefCell::new(StdVec::new()));
        let mut chain = chain(&events);
        let mut bus = ScriptBus::new();
        bus.push_rx(&[0xFF, 0xFF]);
        chain.init(&mut bus);
        events.borrow_mut().clear();

        // pin 0.2 goes low (pressed), everything else steady
        bus.push_rx(&[0xFB, 0xFF]);
        chain.read(&mut bus).unwrap();
        assert_eq!(*events.borrow(), [(0, 2, true)]);

        events.borrow_mut().clear();
        // and back up again
        bus.push_rx(&[0xFF, 0xFF]);
        chain.read(&mut bus).unwrap();
        assert_eq!(*events.borrow(), [(0, 2, false)]);

        assert!(chain.get_pin_state(0, 2));
        assert!(chain.get_state(2));
    }

    #[test]
    fn tick_polls_on_the_interval() {
        let events: Events = Rc::new(RefCell::new(StdVec::new()));
        let mut chain = chain(&events);
        let mut bus = ScriptBus::new();
        bus.push_rx(&[0xFF, 0xFF]);
        chain.init(&mut bus);
        let traffic_after_init = bus.traffic;

        chain.tick(&mut bus, Milliseconds(10u32));
        chain.tick(&mut bus, Milliseconds(25u32));
        assert_eq!(bus.traffic, traffic_after_init);

        bus.push_rx(&[0xFF, 0xFF]);
        chain.tick(&mut bus, Milliseconds(26u32));
        assert!(bus.traffic > traffic_after_init);

        // interval restarts from the poll that ran
        let traffic_after_poll = bus.traffic;
        chain.tick(&mut bus, Milliseconds(40u32));
        assert_eq!(bus.traffic, traffic_after_poll);
    }
}
