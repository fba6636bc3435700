use embedded_hal::blocking::spi::{Transfer, Write};

/// Shift direction of the serial bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// Per-device bus settings, applied by the device itself right before it
/// asserts its chip-select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub prescaler: u32,
    pub bit_order: BitOrder,
}

impl BusConfig {
    pub const fn new(prescaler: u32) -> Self {
        Self {
            prescaler,
            bit_order: BitOrder::MsbFirst,
        }
    }
}

/// Synchronous bus primitives provided by the platform.
///
/// All calls are blocking and unbuffered; failure handling is entirely the
/// implementation's responsibility. `configure` re-applies the clock divisor
/// and bit order for whichever device is about to be addressed.
pub trait Transport {
    type Error;

    fn configure(&mut self, config: &BusConfig);

    fn transmit(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error>;

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;
}

/// [`Transport`] over a blocking `embedded-hal` SPI peripheral whose settings
/// are fixed at initialization.
///
/// Suitable when every device on the bus runs the same clock and bit order;
/// `configure` requests are ignored. Platforms that must reconfigure between
/// devices implement [`Transport`] directly against their HAL.
pub struct SpiTransport<SPI>(pub SPI);

impl<SPI, E> Transport for SpiTransport<SPI>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
{
    type Error = E;

    fn configure(&mut self, _config: &BusConfig) {}

    fn transmit(&mut self, data: &[u8]) -> Result<(), E> {
        self.0.write(data)
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), E> {
        for byte in buffer.iter_mut() {
            *byte = 0;
        }
        self.0.transfer(buffer)?;
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), E> {
        let len = tx.len().min(rx.len());
        rx[..len].copy_from_slice(&tx[..len]);
        self.0.transfer(&mut rx[..len])?;
        Ok(())
    }
}
