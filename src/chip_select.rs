use embedded_hal::digital::v2::OutputPin;

use crate::bus::{BusConfig, Transport};

/// Active-low chip-select line owned by a single device.
pub(crate) struct ChipSelect<Pin>
where
    Pin: OutputPin,
{
    pin: Pin,
}

impl<Pin> ChipSelect<Pin>
where
    Pin: OutputPin,
{
    /// Construct a new CS pin controller and set it high (unselected).
    pub(crate) fn new(mut pin: Pin) -> Self {
        pin.set_high().ok();
        Self { pin }
    }

    /// Apply the device's bus configuration, assert CS and return a guard for
    /// the transaction. The guard releases CS on drop, on every exit path.
    pub(crate) fn select<'a, T>(&'a mut self, bus: &'a mut T, config: &BusConfig) -> Selected<'a, Pin, T>
    where
        T: Transport,
    {
        bus.configure(config);
        self.pin.set_low().ok();
        Selected { cs: self, bus }
    }

    pub(crate) fn deselect(&mut self) {
        self.pin.set_high().ok();
    }
}

/// Scoped bus transaction: while this guard lives, exactly this device is
/// addressed on the shared bus.
pub(crate) struct Selected<'a, Pin, T>
where
    Pin: OutputPin,
    T: Transport,
{
    cs: &'a mut ChipSelect<Pin>,
    bus: &'a mut T,
}

impl<Pin, T> Selected<'_, Pin, T>
where
    Pin: OutputPin,
    T: Transport,
{
    pub(crate) fn transmit(&mut self, data: &[u8]) -> Result<(), T::Error> {
        self.bus.transmit(data)
    }

    pub(crate) fn receive(&mut self, buffer: &mut [u8]) -> Result<(), T::Error> {
        self.bus.receive(buffer)
    }
}

impl<Pin, T> Drop for Selected<'_, Pin, T>
where
    Pin: OutputPin,
    T: Transport,
{
    fn drop(&mut self) {
        self.cs.pin.set_high().ok();
    }
}
