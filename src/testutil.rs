//! Host-side doubles for the transport and pins, used by the driver tests.

use core::cell::Cell;
use core::convert::Infallible;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin};

use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::bus::{BusConfig, Transport};
use crate::frame::{self, CanFrame};
use crate::mcp2515::reg;

/// Tracks how many chip-select lines are asserted at once.
pub struct CsBook {
    active: Cell<u32>,
    max_active: Cell<u32>,
}

impl CsBook {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            active: Cell::new(0),
            max_active: Cell::new(0),
        })
    }

    fn assert(&self) {
        let active = self.active.get() + 1;
        self.active.set(active);
        self.max_active.set(self.max_active.get().max(active));
    }

    fn release(&self) {
        self.active.set(self.active.get().saturating_sub(1));
    }

    pub fn active(&self) -> u32 {
        self.active.get()
    }

    pub fn max_active(&self) -> u32 {
        self.max_active.get()
    }
}

/// A digital pin double; `true` is the high level. Output edges are reported
/// to an optional [`CsBook`] so tests can check chip-select exclusivity.
pub struct TestPin {
    level: Rc<Cell<bool>>,
    book: Option<Rc<CsBook>>,
}

impl TestPin {
    pub fn new() -> Self {
        Self {
            level: Rc::new(Cell::new(true)),
            book: None,
        }
    }

    pub fn shared(level: &Rc<Cell<bool>>) -> Self {
        Self {
            level: level.clone(),
            book: None,
        }
    }

    pub fn watched(book: &Rc<CsBook>) -> Self {
        Self {
            level: Rc::new(Cell::new(true)),
            book: Some(book.clone()),
        }
    }
}

impl OutputPin for TestPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        if self.level.replace(false) {
            if let Some(book) = &self.book {
                book.assert();
            }
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        if !self.level.replace(true) {
            if let Some(book) = &self.book {
                book.release();
            }
        }
        Ok(())
    }
}

impl InputPin for TestPin {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(self.level.get())
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(!self.level.get())
    }
}

pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

/// Recording transport with scripted receive bytes, for the shift-register
/// and memory drivers.
pub struct ScriptBus {
    pub configs: Vec<BusConfig>,
    pub sent: Vec<Vec<u8>>,
    pub rx: VecDeque<Vec<u8>>,
    pub traffic: usize,
}

impl ScriptBus {
    pub fn new() -> Self {
        Self {
            configs: Vec::new(),
            sent: Vec::new(),
            rx: VecDeque::new(),
            traffic: 0,
        }
    }

    pub fn push_rx(&mut self, data: &[u8]) {
        self.rx.push_back(data.to_vec());
    }
}

impl Transport for ScriptBus {
    type Error = Infallible;

    fn configure(&mut self, config: &BusConfig) {
        self.configs.push(*config);
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), Infallible> {
        self.traffic += 1;
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), Infallible> {
        self.traffic += 1;
        let scripted = self.rx.pop_front().unwrap_or_default();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = scripted.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Infallible> {
        self.transmit(tx)?;
        self.receive(rx)
    }
}

/// How the simulated controller resolves a transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxBehavior {
    /// TXREQ clears immediately, no error flags.
    Complete,
    /// TXERR is raised; TXREQ clears only once the abort request arrives.
    ErrorAbort,
    /// TXREQ never clears.
    Stuck,
}

/// Register-file simulation of the CAN controller: honors the RESET, READ,
/// WRITE and BIT MODIFY instructions over the transport.
pub struct Mcp2515Sim {
    pub regs: [u8; 128],
    /// Every register write performed via the WRITE/BIT MODIFY instructions,
    /// in order.
    pub writes: Vec<(u8, u8)>,
    pub tx_behavior: TxBehavior,
    /// Drop mode requests on the floor, so read-back verification fails.
    pub fail_mode_writes: bool,
    pub traffic: usize,
    pub resets: usize,
    pending_read: Option<u8>,
}

impl Mcp2515Sim {
    pub fn new() -> Self {
        Self {
            regs: [0; 128],
            writes: Vec::new(),
            tx_behavior: TxBehavior::Complete,
            fail_mode_writes: false,
            traffic: 0,
            resets: 0,
            pending_read: None,
        }
    }

    pub fn reg(&self, address: u8) -> u8 {
        self.regs[usize::from(address)]
    }

    pub fn wrote(&self, address: u8, value: u8) -> bool {
        self.writes.iter().any(|w| *w == (address, value))
    }

    /// Latch a received frame into receive buffer `n` and raise its
    /// interrupt flag, the way the controller would.
    pub fn load_rx_frame(&mut self, n: u8, can_frame: &CanFrame) {
        let base = usize::from(reg::rxb_sidh(n));
        let id_regs = frame::encode_id(can_frame.id, can_frame.extended);
        self.regs[base] = id_regs[0];
        self.regs[base + 1] = id_regs[1];
        self.regs[base + 2] = id_regs[2];
        self.regs[base + 3] = id_regs[3];

        let mut dlc = can_frame.dlc & 0x0F;
        if can_frame.rtr {
            if can_frame.extended {
                dlc |= frame::FLAG_RTR;
            } else {
                self.regs[base + 1] |= frame::FLAG_SRR;
            }
        }
        self.regs[usize::from(reg::rxb_dlc(n))] = dlc;

        let d0 = usize::from(reg::rxb_d0(n));
        self.regs[d0..d0 + 8].copy_from_slice(&can_frame.data);

        self.regs[usize::from(reg::CANINTF)] |= 1 << n;
    }

    fn write_reg(&mut self, address: u8, value: u8) {
        self.writes.push((address, value));
        if address == reg::CANCTRL && self.fail_mode_writes {
            return;
        }
        self.regs[usize::from(address)] = value;

        let txb0 = reg::txb_ctrl(0);
        if address == txb0 && value & 0x08 != 0 {
            match self.tx_behavior {
                TxBehavior::Complete => self.regs[usize::from(txb0)] = 0x00,
                TxBehavior::ErrorAbort => self.regs[usize::from(txb0)] = 0x08 | 0x10,
                TxBehavior::Stuck => {}
            }
        }
        if address == reg::CANCTRL && value & 0x10 != 0 {
            // abort request terminates a pending transmission with ABTF
            if self.regs[usize::from(txb0)] & 0x08 != 0 {
                self.regs[usize::from(txb0)] = 0x40;
            }
        }
    }
}

impl Transport for Mcp2515Sim {
    type Error = Infallible;

    fn configure(&mut self, _config: &BusConfig) {}

    fn transmit(&mut self, data: &[u8]) -> Result<(), Infallible> {
        self.traffic += 1;
        match data[0] {
            0xC0 => {
                self.regs = [0; 128];
                self.resets += 1;
            }
            0x02 => {
                for (i, value) in data[2..].iter().enumerate() {
                    self.write_reg(data[1] + i as u8, *value);
                }
            }
            0x05 => {
                let current = self.regs[usize::from(data[1])];
                let merged = (current & !data[2]) | (data[3] & data[2]);
                self.write_reg(data[1], merged);
            }
            0x03 => {
                self.pending_read = Some(data[1]);
            }
            _ => {}
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), Infallible> {
        self.traffic += 1;
        match self.pending_read.take() {
            Some(address) => {
                for (i, byte) in buffer.iter_mut().enumerate() {
                    *byte = self.regs[usize::from(address) + i];
                }
            }
            None => {
                for byte in buffer.iter_mut() {
                    *byte = 0;
                }
            }
        }
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Infallible> {
        self.transmit(tx)?;
        self.receive(rx)
    }
}
