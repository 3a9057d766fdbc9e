//! The byte transport between the host MCU and the Ethernet controller.
//!
//! Every controller register access is one *transaction*: chip-select is asserted, a 3-byte header
//! (16-bit register address, big-endian, followed by a control byte carrying the read/write flag)
//! is clocked out, the data bytes are written or read, and chip-select is deasserted again.
//! Multi-byte registers (a MAC address, an IPv4 address) are always moved in a single transaction,
//! and chip-select is never held across two transactions: the controller latches the address at
//! the start of a frame and auto-increments through the data phase, so a frame that runs on into
//! the next logical operation would scribble over unrelated registers.

use crate::debug_util;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use log::{trace, warn};

/// Control byte for a write frame (bit 7 clear).
pub const CONTROL_WRITE: u8 = 0x00;
/// Control byte for a read frame (bit 7 set).
pub const CONTROL_READ: u8 = 0x80;

/// The direction of a register transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub const fn control_byte(self) -> u8 {
        match self {
            Access::Read => CONTROL_READ,
            Access::Write => CONTROL_WRITE,
        }
    }
}

/// Builds the 3-byte frame header for a transaction at `address`.
pub const fn frame_header(address: u16, access: Access) -> [u8; 3] {
    [(address >> 8) as u8, address as u8, access.control_byte()]
}

/// A failure of the underlying bus. From the driver's point of view this is always a hardware
/// fault: it is surfaced to the caller and never retried at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The SPI peripheral reported an error during the header or data phase.
    Spi(embedded_hal::spi::ErrorKind),
    /// The chip-select line could not be driven.
    ChipSelect(embedded_hal::digital::ErrorKind),
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusError::Spi(kind) => write!(f, "SPI bus error: {kind:?}"),
            BusError::ChipSelect(kind) => write!(f, "chip-select error: {kind:?}"),
        }
    }
}

/// The register-transaction capability the driver is written against.
///
/// Implementations must perform each call as exactly one chip-select-framed transaction.
pub trait RegisterBus {
    /// Writes `data` starting at register `address`.
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BusError>;

    /// Fills `buf` with the register contents starting at `address`.
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), BusError>;

    fn write_u8(&mut self, address: u16, value: u8) -> Result<(), BusError> {
        self.write(address, &[value])
    }

    fn read_u8(&mut self, address: u16) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.read(address, &mut buf)?;
        Ok(buf[0])
    }

    /// Writes a big-endian 16-bit register pair in one transaction.
    fn write_u16(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        self.write(address, &value.to_be_bytes())
    }

    /// Reads a big-endian 16-bit register pair in one transaction.
    fn read_u16(&mut self, address: u16) -> Result<u16, BusError> {
        let mut buf = [0u8; 2];
        self.read(address, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        (**self).write(address, data)
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read(address, buf)
    }
}

/// Keeps chip-select asserted (low) for as long as it is alive, and deasserts it when dropped, so
/// that every early return out of a transaction still ends the frame.
struct ChipSelect<'a, CS: OutputPin> {
    pin: &'a mut CS,
}

impl<'a, CS: OutputPin> ChipSelect<'a, CS> {
    fn assert(pin: &'a mut CS) -> Result<Self, BusError> {
        pin.set_low()
            .map_err(|e| BusError::ChipSelect(embedded_hal::digital::Error::kind(&e)))?;
        Ok(ChipSelect { pin })
    }
}

impl<'a, CS: OutputPin> Drop for ChipSelect<'a, CS> {
    fn drop(&mut self) {
        // Nothing can be propagated out of a drop. If this fails the next assert will most likely
        // fail too, and that error does get reported.
        if let Err(e) = self.pin.set_high() {
            warn!(
                "Failed to deassert chip-select: {:?}",
                embedded_hal::digital::Error::kind(&e)
            );
        }
    }
}

/// A [RegisterBus] over an `embedded-hal` SPI bus plus a dedicated chip-select GPIO.
pub struct SpiRegisterBus<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI: SpiBus<u8>, CS: OutputPin> SpiRegisterBus<SPI, CS> {
    /// Constructs a new instance, driving chip-select to its inactive (high) level first.
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, BusError> {
        cs.set_high()
            .map_err(|e| BusError::ChipSelect(embedded_hal::digital::Error::kind(&e)))?;
        Ok(SpiRegisterBus { spi, cs })
    }

    /// Gives back the SPI bus and chip-select pin.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn transaction(
        &mut self,
        address: u16,
        access: Access,
        data_phase: impl FnOnce(&mut SPI) -> Result<(), SPI::Error>,
    ) -> Result<(), BusError> {
        let spi_err = |e: SPI::Error| BusError::Spi(embedded_hal::spi::Error::kind(&e));
        let Self { spi, cs } = self;
        let _frame = ChipSelect::assert(cs)?;
        spi.write(&frame_header(address, access)).map_err(spi_err)?;
        data_phase(spi).map_err(spi_err)?;
        // All words must be on the wire before chip-select goes high again.
        spi.flush().map_err(spi_err)
    }
}

impl<SPI: SpiBus<u8>, CS: OutputPin> RegisterBus for SpiRegisterBus<SPI, CS> {
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        trace!("BUS write 0x{address:04X} ({} bytes)", data.len());
        debug_util::log_data_hex(log::Level::Trace, data);
        self.transaction(address, Access::Write, |spi| spi.write(data))
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), BusError> {
        self.transaction(address, Access::Read, |spi| spi.read(buf))?;
        trace!("BUS read 0x{address:04X} ({} bytes)", buf.len());
        debug_util::log_data_hex(log::Level::Trace, buf);
        Ok(())
    }
}
