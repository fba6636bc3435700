//! Driver for the CAT25080 1 KiB SPI EEPROM.
//!
//! Writes go through the chip's WREN / self-timed-cycle protocol; every
//! operation first waits for a previous write cycle to finish by polling the
//! status register against a millisecond budget.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_time::duration::Milliseconds;

use crate::bus::{BusConfig, Transport};
use crate::chip_select::ChipSelect;
use crate::device::Device;

const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_READ_STATUS: u8 = 0x05;
const CMD_READ_DATA: u8 = 0x03;
const CMD_WRITE_DATA: u8 = 0x02;

/// Status register WIP bit: a write cycle is in progress.
const STATUS_BUSY: u8 = 0x01;

pub const MAX_ADDRESS: u16 = 1023;
pub const MAX_PAGE: u16 = 31;
pub const PAGE_SIZE: usize = 32;

/// Budget for the chip's self-timed write cycle (datasheet max is 5 ms).
const READY_BUDGET: Milliseconds = Milliseconds(100u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromError {
    /// Address or page outside the 1 KiB array.
    Range,
    /// The previous write cycle did not finish within the ready budget.
    Timeout,
    /// The transport reported a failure.
    Bus,
}

pub struct Cat25080<CS, D>
where
    CS: OutputPin,
    D: DelayMs<u32>,
{
    cs: ChipSelect<CS>,
    config: BusConfig,
    delay: D,
}

impl<CS, D> Cat25080<CS, D>
where
    CS: OutputPin,
    D: DelayMs<u32>,
{
    pub fn new(cs_pin: CS, spi_prescaler: u32, delay: D) -> Self {
        Self {
            cs: ChipSelect::new(cs_pin),
            config: BusConfig::new(spi_prescaler),
            delay,
        }
    }

    pub fn read_byte<T: Transport>(&mut self, bus: &mut T, address: u16) -> Result<u8, EepromError> {
        let mut result = [0u8; 1];
        self.read_bytes(bus, address, &mut result)?;
        Ok(result[0])
    }

    /// Read a full 32-byte page.
    pub fn read_page<T: Transport>(
        &mut self,
        bus: &mut T,
        page: u16,
        data: &mut [u8; PAGE_SIZE],
    ) -> Result<(), EepromError> {
        if page > MAX_PAGE {
            return Err(EepromError::Range);
        }
        self.read_bytes(bus, page * PAGE_SIZE as u16, data)
    }

    /// Sequential read of `data.len()` bytes starting at `address`.
    pub fn read_bytes<T: Transport>(
        &mut self,
        bus: &mut T,
        address: u16,
        data: &mut [u8],
    ) -> Result<(), EepromError> {
        if usize::from(address) + data.len() > usize::from(MAX_ADDRESS) + 1 {
            return Err(EepromError::Range);
        }
        self.wait_ready(bus, READY_BUDGET)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd3(CMD_READ_DATA, address))
            .and_then(|_| selected.receive(data))
            .map_err(|_| EepromError::Bus)
    }

    pub fn write_byte<T: Transport>(
        &mut self,
        bus: &mut T,
        address: u16,
        data: u8,
    ) -> Result<(), EepromError> {
        if address > MAX_ADDRESS {
            return Err(EepromError::Range);
        }
        self.wait_ready(bus, READY_BUDGET)?;
        self.write_enable(bus)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd3(CMD_WRITE_DATA, address))
            .and_then(|_| selected.transmit(&[data]))
            .map_err(|_| EepromError::Bus)
    }

    /// Write a full 32-byte page. The chip latches at most one page per WREN,
    /// so larger writes must come through here page by page.
    pub fn write_page<T: Transport>(
        &mut self,
        bus: &mut T,
        page: u16,
        data: &[u8; PAGE_SIZE],
    ) -> Result<(), EepromError> {
        if page > MAX_PAGE {
            return Err(EepromError::Range);
        }
        self.wait_ready(bus, READY_BUDGET)?;
        self.write_enable(bus)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd3(CMD_WRITE_DATA, page * PAGE_SIZE as u16))
            .and_then(|_| selected.transmit(data))
            .map_err(|_| EepromError::Bus)
    }

    pub fn write_enable<T: Transport>(&mut self, bus: &mut T) -> Result<(), EepromError> {
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[CMD_WRITE_ENABLE])
            .map_err(|_| EepromError::Bus)
    }

    pub fn read_status<T: Transport>(&mut self, bus: &mut T) -> Result<u8, EepromError> {
        let mut status = [0u8; 1];
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[CMD_READ_STATUS])
            .and_then(|_| selected.receive(&mut status))
            .map_err(|_| EepromError::Bus)?;
        Ok(status[0])
    }

    /// Poll the status register until the write-in-progress bit clears,
    /// burning 1 ms of the budget per poll.
    pub fn wait_ready<T: Transport>(
        &mut self,
        bus: &mut T,
        budget: Milliseconds,
    ) -> Result<(), EepromError> {
        let mut remaining = budget.0;
        loop {
            if self.read_status(bus)? & STATUS_BUSY == 0 {
                return Ok(());
            }
            if remaining == 0 {
                return Err(EepromError::Timeout);
            }
            self.delay.delay_ms(1);
            remaining -= 1;
        }
    }
}

fn cmd3(cmd: u8, address: u16) -> [u8; 3] {
    [cmd, (address >> 8) as u8, address as u8]
}

impl<CS, D, T> Device<T> for Cat25080<CS, D>
where
    CS: OutputPin,
    D: DelayMs<u32>,
    T: Transport,
{
    /// The chip has no reset instruction; a bare select/deselect cycle
    /// terminates whatever transfer it may have been left in.
    fn init(&mut self, bus: &mut T) {
        let _selected = self.cs.select(bus, &self.config);
    }

    fn tick(&mut self, _bus: &mut T, _now: Milliseconds) {}

    fn deselect(&mut self) {
        self.cs.deselect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{NoDelay, ScriptBus, TestPin};

    fn eeprom() -> Cat25080<TestPin, NoDelay> {
        Cat25080::new(TestPin::new(), 32, NoDelay)
    }

    #[test]
    fn read_byte_frames_address_after_ready_poll() {
        let mut bus = ScriptBus::new();
        bus.push_rx(&[0x00]); // status: ready
        bus.push_rx(&[0xAB]);

        let mut eeprom = eeprom();
        assert_eq!(eeprom.read_byte(&mut bus, 0x0123), Ok(0xAB));
        assert_eq!(bus.sent, [&[0x05][..], &[0x03, 0x01, 0x23][..]]);
    }

    #[test]
    fn write_byte_is_preceded_by_wren() {
        let mut bus = ScriptBus::new();
        bus.push_rx(&[0x00]);

        let mut eeprom = eeprom();
        eeprom.write_byte(&mut bus, 0x03FF, 0x42).unwrap();
        assert_eq!(
            bus.sent,
            [&[0x05][..], &[0x06][..], &[0x02, 0x03, 0xFF][..], &[0x42][..]]
        );
    }

    #[test]
    fn page_operations_use_byte_addresses() {
        let mut bus = ScriptBus::new();
        bus.push_rx(&[0x00]);

        let mut eeprom = eeprom();
        let data = [0x11u8; PAGE_SIZE];
        eeprom.write_page(&mut bus, 2, &data).unwrap();
        // page 2 starts at byte 64
        assert_eq!(bus.sent[2], [0x02, 0x00, 0x40]);
        assert_eq!(bus.sent[3].len(), PAGE_SIZE);
    }

    #[test]
    fn out_of_range_operations_stay_off_the_bus() {
        let mut bus = ScriptBus::new();
        let mut eeprom = eeprom();

        assert_eq!(eeprom.write_byte(&mut bus, 1024, 0x00), Err(EepromError::Range));
        assert_eq!(eeprom.read_byte(&mut bus, 1024), Err(EepromError::Range));
        let mut page = [0u8; PAGE_SIZE];
        assert_eq!(eeprom.read_page(&mut bus, 32, &mut page), Err(EepromError::Range));
        // a read ending past the array is rejected too
        let mut tail = [0u8; 2];
        assert_eq!(
            eeprom.read_bytes(&mut bus, MAX_ADDRESS, &mut tail),
            Err(EepromError::Range)
        );
        assert_eq!(bus.traffic, 0);
    }

    #[test]
    fn stuck_write_cycle_times_out() {
        let mut bus = ScriptBus::new();
        for _ in 0..8 {
            bus.push_rx(&[STATUS_BUSY]);
        }

        let mut eeprom = eeprom();
        assert_eq!(
            eeprom.wait_ready(&mut bus, Milliseconds(3u32)),
            Err(EepromError::Timeout)
        );
    }
}
