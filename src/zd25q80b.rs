//! Driver for the ZD25Q80B 1 MiB SPI NOR flash.
//!
//! Program and erase are self-timed; every operation first polls the status
//! register for the previous cycle against a millisecond budget. Erase
//! granularities go from a single 256-byte page up to the whole chip.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_time::duration::Milliseconds;

use crate::bus::{BusConfig, Transport};
use crate::chip_select::ChipSelect;
use crate::device::Device;

const CMD_READ_ARRAY: u8 = 0x03;
const CMD_PAGE_ERASE: u8 = 0x81;
const CMD_SECTOR_ERASE: u8 = 0x20;
const CMD_BLOCK_ERASE_32K: u8 = 0x52;
const CMD_BLOCK_ERASE_64K: u8 = 0xD8;
const CMD_CHIP_ERASE: u8 = 0x60;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_READ_STATUS: u8 = 0x05;
const CMD_READ_ID: u8 = 0x9F;
const CMD_READ_UNIQUE_ID: u8 = 0x4B;
const CMD_RESET_ENABLE: u8 = 0x66;
const CMD_RESET: u8 = 0x99;

/// Status register WIP bit: a program or erase cycle is in progress.
const STATUS_BUSY: u8 = 0x01;

pub const MAX_ADDRESS: u32 = 1_048_575;
pub const MAX_PAGE: u32 = 4095;
pub const MAX_SECTOR: u32 = 255;
pub const MAX_BLOCK32: u32 = 31;
pub const MAX_BLOCK64: u32 = 15;

pub const PAGE_SIZE: usize = 256;
pub const SECTOR_SIZE: u32 = 4096;
pub const BLOCK32_SIZE: u32 = 32_768;
pub const BLOCK64_SIZE: u32 = 65_536;

/// Budget for program and small-erase cycles. Chip erase takes seconds and
/// is waited for by the next operation instead.
const READY_BUDGET: Milliseconds = Milliseconds(500u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Address or erase-unit index outside the array.
    Range,
    /// The previous program/erase cycle did not finish within the budget.
    Timeout,
    /// The transport reported a failure.
    Bus,
}

pub struct Zd25q80b<CS, D>
where
    CS: OutputPin,
    D: DelayMs<u32>,
{
    cs: ChipSelect<CS>,
    config: BusConfig,
    delay: D,
}

impl<CS, D> Zd25q80b<CS, D>
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

    /// Sequential array read of `data.len()` bytes starting at `address`.
    pub fn read_bytes<T: Transport>(
        &mut self,
        bus: &mut T,
        address: u32,
        data: &mut [u8],
    ) -> Result<(), FlashError> {
        if address as usize + data.len() > MAX_ADDRESS as usize + 1 {
            return Err(FlashError::Range);
        }
        self.wait_ready(bus, READY_BUDGET)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd4(CMD_READ_ARRAY, address))
            .and_then(|_| selected.receive(data))
            .map_err(|_| FlashError::Bus)
    }

    pub fn read_page<T: Transport>(
        &mut self,
        bus: &mut T,
        page: u32,
        data: &mut [u8; PAGE_SIZE],
    ) -> Result<(), FlashError> {
        if page > MAX_PAGE {
            return Err(FlashError::Range);
        }
        self.read_bytes(bus, page * PAGE_SIZE as u32, data)
    }

    /// Program one erased 256-byte page.
    pub fn write_page<T: Transport>(
        &mut self,
        bus: &mut T,
        page: u32,
        data: &[u8; PAGE_SIZE],
    ) -> Result<(), FlashError> {
        if page > MAX_PAGE {
            return Err(FlashError::Range);
        }
        self.wait_ready(bus, READY_BUDGET)?;
        self.write_enable(bus)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd4(CMD_PAGE_PROGRAM, page * PAGE_SIZE as u32))
            .and_then(|_| selected.transmit(data))
            .map_err(|_| FlashError::Bus)
    }

    pub fn erase_page<T: Transport>(&mut self, bus: &mut T, page: u32) -> Result<(), FlashError> {
        if page > MAX_PAGE {
            return Err(FlashError::Range);
        }
        self.erase(bus, CMD_PAGE_ERASE, page * PAGE_SIZE as u32)
    }

    pub fn erase_sector<T: Transport>(&mut self, bus: &mut T, sector: u32) -> Result<(), FlashError> {
        if sector > MAX_SECTOR {
            return Err(FlashError::Range);
        }
        self.erase(bus, CMD_SECTOR_ERASE, sector * SECTOR_SIZE)
    }

    pub fn erase_block32<T: Transport>(&mut self, bus: &mut T, block: u32) -> Result<(), FlashError> {
        if block > MAX_BLOCK32 {
            return Err(FlashError::Range);
        }
        self.erase(bus, CMD_BLOCK_ERASE_32K, block * BLOCK32_SIZE)
    }

    pub fn erase_block64<T: Transport>(&mut self, bus: &mut T, block: u32) -> Result<(), FlashError> {
        if block > MAX_BLOCK64 {
            return Err(FlashError::Range);
        }
        self.erase(bus, CMD_BLOCK_ERASE_64K, block * BLOCK64_SIZE)
    }

    /// Erase the whole array. Returns as soon as the cycle is started; the
    /// next operation's ready poll absorbs the multi-second erase time.
    pub fn erase_chip<T: Transport>(&mut self, bus: &mut T) -> Result<(), FlashError> {
        self.wait_ready(bus, READY_BUDGET)?;
        self.write_enable(bus)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[CMD_CHIP_ERASE])
            .map_err(|_| FlashError::Bus)
    }

    pub fn write_enable<T: Transport>(&mut self, bus: &mut T) -> Result<(), FlashError> {
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[CMD_WRITE_ENABLE])
            .map_err(|_| FlashError::Bus)
    }

    pub fn read_status<T: Transport>(&mut self, bus: &mut T) -> Result<u8, FlashError> {
        let mut status = [0u8; 1];
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[CMD_READ_STATUS])
            .and_then(|_| selected.receive(&mut status))
            .map_err(|_| FlashError::Bus)?;
        Ok(status[0])
    }

    /// JEDEC manufacturer/device id, 3 bytes.
    pub fn read_device_id<T: Transport>(&mut self, bus: &mut T) -> Result<[u8; 3], FlashError> {
        let mut id = [0u8; 3];
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[CMD_READ_ID])
            .and_then(|_| selected.receive(&mut id))
            .map_err(|_| FlashError::Bus)?;
        Ok(id)
    }

    /// Factory-programmed 128-bit unique id.
    pub fn read_unique_id<T: Transport>(&mut self, bus: &mut T) -> Result<[u8; 16], FlashError> {
        let mut id = [0u8; 16];
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd4(CMD_READ_UNIQUE_ID, 0))
            .and_then(|_| selected.receive(&mut id))
            .map_err(|_| FlashError::Bus)?;
        Ok(id)
    }

    /// Poll the status register until the write-in-progress bit clears,
    /// burning 1 ms of the budget per poll.
    pub fn wait_ready<T: Transport>(
        &mut self,
        bus: &mut T,
        budget: Milliseconds,
    ) -> Result<(), FlashError> {
        let mut remaining = budget.0;
        loop {
            if self.read_status(bus)? & STATUS_BUSY == 0 {
                return Ok(());
            }
            if remaining == 0 {
                return Err(FlashError::Timeout);
            }
            self.delay.delay_ms(1);
            remaining -= 1;
        }
    }

    fn erase<T: Transport>(&mut self, bus: &mut T, cmd: u8, address: u32) -> Result<(), FlashError> {
        self.wait_ready(bus, READY_BUDGET)?;
        self.write_enable(bus)?;

        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&cmd4(cmd, address))
            .map_err(|_| FlashError::Bus)
    }
}

fn cmd4(cmd: u8, address: u32) -> [u8; 4] {
    [cmd, (address >> 16) as u8, (address >> 8) as u8, address as u8]
}

impl<CS, D, T> Device<T> for Zd25q80b<CS, D>
where
    CS: OutputPin,
    D: DelayMs<u32>,
    T: Transport,
{
    /// Software-reset the chip so a power glitch mid-transfer cannot leave it
    /// in a continuous-read state.
    fn init(&mut self, bus: &mut T) {
        {
            let mut selected = self.cs.select(bus, &self.config);
            if selected.transmit(&[CMD_RESET_ENABLE]).is_err() {
                log::warn!("zd25q80b reset-enable failed");
                return;
            }
        }
        {
            let mut selected = self.cs.select(bus, &self.config);
            if selected.transmit(&[CMD_RESET]).is_err() {
                log::warn!("zd25q80b reset failed");
                return;
            }
        }
        if self.wait_ready(bus, READY_BUDGET).is_err() {
            log::warn!("zd25q80b not ready after reset");
        }
    }

    fn tick(&mut self, _bus: &mut T, _now: Milliseconds) {}

    fn deselect(&mut self) {
        self.cs.deselect();
    }
}
