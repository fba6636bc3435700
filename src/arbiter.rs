use core::cell::RefCell;

use embedded_time::duration::Milliseconds;
use heapless::{ArrayLength, Vec};

use crate::bus::Transport;
use crate::device::Device;

/// A registered device. Devices live in `RefCell`s owned by the host so the
/// host keeps its own handle for direct operations (starting a CAN packet,
/// writing an EEPROM byte) while the arbiter drives `init`/`tick`.
pub type DeviceRef<'d, T> = &'d RefCell<dyn Device<T> + 'd>;

/// Multiplexes chip-select-addressed devices over the one shared bus.
///
/// Registration order is dispatch order. Dispatch is single-threaded and
/// sequential: a device's `tick` runs to completion before the next device is
/// visited, which is the only mutual-exclusion mechanism the bus needs.
pub struct Arbiter<'d, T, N>
where
    T: Transport,
    N: ArrayLength<DeviceRef<'d, T>>,
{
    bus: T,
    devices: Vec<DeviceRef<'d, T>, N>,
}

impl<'d, T, N> Arbiter<'d, T, N>
where
    T: Transport,
    N: ArrayLength<DeviceRef<'d, T>>,
{
    pub fn new(bus: T) -> Self {
        Self {
            bus,
            devices: Vec::new(),
        }
    }

    /// Append a device to the registry and run its one-time `init`.
    ///
    /// A full registry makes this a no-op; the capacity is part of the
    /// arbiter's type and sized for the board at construction.
    pub fn add_device(&mut self, device: DeviceRef<'d, T>) {
        if self.devices.push(device).is_err() {
            log::warn!("device registry full, registration ignored");
            return;
        }
        device.borrow_mut().init(&mut self.bus);
    }

    /// Forward the scheduling tick to every device in registration order.
    pub fn dispatch(&mut self, now: Milliseconds) {
        for device in &self.devices {
            device.borrow_mut().tick(&mut self.bus, now);
        }
    }

    /// Force every device's chip-select inactive. Fault recovery only.
    pub fn deselect_all(&mut self) {
        for device in &self.devices {
            device.borrow_mut().deselect();
        }
    }

    /// The shared transport, for host-initiated device operations.
    pub fn bus(&mut self) -> &mut T {
        &mut self.bus
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
