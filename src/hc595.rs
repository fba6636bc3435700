//! Driver for a chain of 74HC595 output shift registers.
//!
//! The chain holds a local image of every output byte; any mutation re-shifts
//! the whole image and pulses the storage-register latch, so the outputs
//! always reflect the image atomically. `N` is the number of chained
//! registers.

use embedded_hal::digital::v2::OutputPin;
use embedded_time::duration::Milliseconds;
use heapless::{ArrayLength, Vec};

use crate::bus::{BusConfig, Transport};
use crate::chip_select::ChipSelect;
use crate::device::Device;

pub struct Hc595<CS, L, OE, N>
where
    CS: OutputPin,
    L: OutputPin,
    OE: OutputPin,
    N: ArrayLength<u8>,
{
    cs: ChipSelect<CS>,
    latch: L,
    oe: OE,
    config: BusConfig,
    data: Vec<u8, N>,
}

impl<CS, L, OE, N> Hc595<CS, L, OE, N>
where
    CS: OutputPin,
    L: OutputPin,
    OE: OutputPin,
    N: ArrayLength<u8>,
{
    /// The latch idles low; outputs start disabled (OE is active low).
    pub fn new(cs_pin: CS, mut latch_pin: L, mut oe_pin: OE, spi_prescaler: u32) -> Self {
        latch_pin.set_low().ok();
        oe_pin.set_high().ok();
        let mut data = Vec::new();
        data.resize(data.capacity(), 0x00).ok();
        Self {
            cs: ChipSelect::new(cs_pin),
            latch: latch_pin,
            oe: oe_pin,
            config: BusConfig::new(spi_prescaler),
            data,
        }
    }

    pub fn output_enable(&mut self) {
        self.oe.set_low().ok();
    }

    pub fn output_disable(&mut self) {
        self.oe.set_high().ok();
    }

    /// Set one output by flat index (`device * 8 + pin`).
    pub fn set_state<T: Transport>(
        &mut self,
        bus: &mut T,
        index: u8,
        state: bool,
    ) -> Result<(), T::Error> {
        self.set_pin_state(bus, index / 8, index % 8, state)
    }

    /// Set one output of one register in the chain. Out-of-range coordinates
    /// are ignored.
    pub fn set_pin_state<T: Transport>(
        &mut self,
        bus: &mut T,
        device: u8,
        pin: u8,
        state: bool,
    ) -> Result<(), T::Error> {
        if usize::from(device) >= self.data.len() || pin >= 8 {
            return Ok(());
        }
        let byte = &mut self.data[usize::from(device)];
        *byte = (*byte & !(1 << pin)) | ((state as u8) << pin);
        self.shift_out(bus)
    }

    pub fn get_state(&self, index: u8) -> bool {
        self.get_pin_state(index / 8, index % 8)
    }

    pub fn get_pin_state(&self, device: u8, pin: u8) -> bool {
        if usize::from(device) >= self.data.len() || pin >= 8 {
            return false;
        }
        (self.data[usize::from(device)] >> pin) & 0x01 != 0
    }

    /// Replace a whole register of the chain.
    pub fn write_byte<T: Transport>(
        &mut self,
        bus: &mut T,
        device: u8,
        byte: u8,
    ) -> Result<(), T::Error> {
        if usize::from(device) >= self.data.len() {
            return Ok(());
        }
        self.data[usize::from(device)] = byte;
        self.shift_out(bus)
    }

    /// Update only the masked bits of a register.
    pub fn write_by_mask<T: Transport>(
        &mut self,
        bus: &mut T,
        device: u8,
        byte: u8,
        mask: u8,
    ) -> Result<(), T::Error> {
        if usize::from(device) >= self.data.len() {
            return Ok(());
        }
        let current = &mut self.data[usize::from(device)];
        *current = (*current & !mask) | (byte & mask);
        self.shift_out(bus)
    }

    fn shift_out<T: Transport>(&mut self, bus: &mut T) -> Result<(), T::Error> {
        {
            let mut selected = self.cs.select(bus, &self.config);
            selected.transmit(&self.data)?;
        }
        // storage-register clock pulse moves the shifted bits to the outputs
        self.latch.set_high().ok();
        self.latch.set_low().ok();
        Ok(())
    }
}

impl<CS, L, OE, N, T> Device<T> for Hc595<CS, L, OE, N>
where
    CS: OutputPin,
    L: OutputPin,
    OE: OutputPin,
    N: ArrayLength<u8>,
    T: Transport,
{
    fn init(&mut self, bus: &mut T) {
        for byte in self.data.iter_mut() {
            *byte = 0x00;
        }
        if self.shift_out(bus).is_err() {
            log::warn!("hc595 initial shift-out failed");
        }
    }

    fn tick(&mut self, _bus: &mut T, _now: Milliseconds) {}

    fn deselect(&mut self) {
        self.cs.deselect();
    }
}
