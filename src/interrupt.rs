use embedded_hal::digital::v2::InputPin;

/// Active-low interrupt-sense line, sampled synchronously from `tick` instead
/// of being serviced by a real interrupt vector.
pub(crate) struct Interrupt<Pin>
where
    Pin: InputPin,
{
    pin: Pin,
}

impl<Pin> Interrupt<Pin>
where
    Pin: InputPin,
{
    pub(crate) fn new(pin: Pin) -> Self {
        Self { pin }
    }

    pub(crate) fn is_asserted(&self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }
}
