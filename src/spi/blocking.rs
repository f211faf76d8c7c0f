//! A ready-made [`SpiBus`] implementation over `embedded-hal` 0.2's blocking
//! SPI and digital I/O traits.
//!
//! Most callers have a plain SPI peripheral and a GPIO pin for chip select
//! rather than a bus type that already understands W5500 framing. This
//! module bridges the two so a caller does not have to write the
//! chip-select bracketing themselves.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use super::{FrameHeader, SpiBus};

/// Combines an `embedded-hal` SPI peripheral and a chip-select pin into a
/// [`SpiBus`].
pub struct W5500Bus<SPI, CS> {
    spi: SPI,
    cs: CS,
}

/// Error produced by [`W5500Bus`]: either the SPI peripheral or the chip
/// select pin failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<SpiError, PinError> {
    /// The SPI peripheral reported an error.
    Spi(SpiError),
    /// The chip select pin reported an error.
    Pin(PinError),
}

impl<SPI, CS, SpiError, PinError> W5500Bus<SPI, CS>
where
    SPI: Transfer<u8, Error = SpiError> + Write<u8, Error = SpiError>,
    CS: OutputPin<Error = PinError>,
{
    /// Creates a new bus from an SPI peripheral and a chip-select pin.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Releases the SPI peripheral and the chip-select pin.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn with_chip_selected<T>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<T, SpiError>,
    ) -> Result<T, Error<SpiError, PinError>> {
        self.cs.set_low().map_err(Error::Pin)?;
        let result = f(&mut self.spi).map_err(Error::Spi);
        self.cs.set_high().map_err(Error::Pin)?;
        result
    }
}

impl<SPI, CS, SpiError, PinError> SpiBus for W5500Bus<SPI, CS>
where
    SPI: Transfer<u8, Error = SpiError> + Write<u8, Error = SpiError>,
    CS: OutputPin<Error = PinError>,
{
    type Error = Error<SpiError, PinError>;

    fn write_frame(&mut self, header: &FrameHeader, data: &[u8]) -> Result<(), Self::Error> {
        self.with_chip_selected(|spi| {
            spi.write(header)?;
            spi.write(data)
        })
    }

    fn read_frame(&mut self, header: &FrameHeader, data: &mut [u8]) -> Result<(), Self::Error> {
        self.with_chip_selected(|spi| {
            spi.write(header)?;
            spi.transfer(data)?;
            Ok(())
        })
    }
}
