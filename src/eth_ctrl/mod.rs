//! Driver for the hardwired TCP/IP Ethernet controller: reset and bring-up, and get/set of the
//! interface addresses held in the common register block.
//!
//! The controller runs its own TCP/IP stack. Besides the interface configuration handled here, it
//! exposes hardware sockets, which [socket::ChipStack] turns into a [crate::net::NetStack].

pub mod regs;
#[cfg(test)]
pub(crate) mod sim;
pub mod socket;

pub use socket::{ChipRawSocket, ChipSocket, ChipStack, Timeouts};

use core::net::Ipv4Addr;

use crate::addr::{self, InvalidAddressFormat, MacAddress};
use crate::bus::{BusError, RegisterBus};
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

/// How long the controller is given to come out of a software reset.
pub const RESET_SETTLE_MS: u32 = 100;
/// How many times MR is read back, 1ms apart, while waiting for the reset bit to clear.
const RESET_POLL_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The bus transport failed. Never retried at this layer.
    HardwareFault(BusError),
    /// A caller-supplied address was malformed. Detected before anything is written to the chip.
    InvalidAddressFormat(InvalidAddressFormat),
    /// The operation requires the chip to be operational, i.e. successfully reset.
    NotOperational(ChipState),
    /// The reset bit in MR never cleared.
    ResetTimeout,
}
pub type Result<T> = core::result::Result<T, Error>;

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Error::HardwareFault(e)
    }
}

impl From<InvalidAddressFormat> for Error {
    fn from(e: InvalidAddressFormat) -> Self {
        Error::InvalidAddressFormat(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::HardwareFault(e) => write!(f, "hardware fault: {e}"),
            Error::InvalidAddressFormat(e) => write!(f, "{e}"),
            Error::NotOperational(state) => write!(f, "controller not operational ({state:?})"),
            Error::ResetTimeout => write!(f, "controller did not come out of reset"),
        }
    }
}

/// Reflects the initialization state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipState {
    /// Nothing has been done to the chip yet (or a reset attempt failed).
    Uninitialized,
    /// The reset bit has been written and the chip has not yet reported completion.
    ResetInProgress,
    /// The reset completed; register and socket operations are allowed.
    Operational,
}

/// A complete, validated set of interface addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
}

impl InterfaceConfig {
    /// Parses all four addresses. Fails on the first malformed one.
    pub fn parse(
        mac: &str,
        ip: &str,
        gateway: &str,
        subnet: &str,
    ) -> core::result::Result<Self, InvalidAddressFormat> {
        Ok(InterfaceConfig {
            mac: mac.parse()?,
            ip: addr::parse_ipv4(ip)?,
            gateway: addr::parse_ipv4(gateway)?,
            subnet: addr::parse_ipv4(subnet)?,
        })
    }
}

/// The main entry point to this module.
pub struct EthController<B, D> {
    bus: B,
    delay: D,
    state: ChipState,
}

impl<B: RegisterBus, D: DelayNs> EthController<B, D> {
    /// Constructs a new instance. The chip is assumed to be in an unknown state until [Self::reset]
    /// succeeds.
    pub fn new(bus: B, delay: D) -> Self {
        EthController {
            bus,
            delay,
            state: ChipState::Uninitialized,
        }
    }

    pub fn state(&self) -> ChipState {
        self.state
    }

    /// Performs a software reset and waits for the chip to become operational.
    ///
    /// Writes the reset bit to MR, blocks for [RESET_SETTLE_MS], selects normal operation, and
    /// then reads MR back until the reset bit reads clear.
    pub fn reset(&mut self) -> Result<()> {
        self.state = ChipState::ResetInProgress;
        let result = self.do_reset();
        self.state = match result {
            Ok(()) => ChipState::Operational,
            Err(_) => ChipState::Uninitialized,
        };
        match result {
            Ok(()) => info!("Ethernet controller reset, now operational"),
            Err(e) => warn!("Ethernet controller reset failed: {e}"),
        }
        result
    }

    fn do_reset(&mut self) -> Result<()> {
        self.bus.write_u8(regs::MR, regs::MODE_RESET)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.bus.write_u8(regs::MR, regs::MODE_NORMAL)?;
        for attempt in 0..RESET_POLL_ATTEMPTS {
            let mode = self.bus.read_u8(regs::MR)?;
            if mode & regs::MODE_RESET == 0 {
                debug!("MR cleared after {} polls", attempt + 1);
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(Error::ResetTimeout)
    }

    fn ensure_operational(&self) -> Result<()> {
        match self.state {
            ChipState::Operational => Ok(()),
            other => Err(Error::NotOperational(other)),
        }
    }

    /// Validates all four addresses and, only if every one of them is well-formed, writes them to
    /// the chip. A malformed address therefore never results in a partially configured interface.
    pub fn configure(&mut self, mac: &str, ip: &str, gateway: &str, subnet: &str) -> Result<()> {
        let config = InterfaceConfig::parse(mac, ip, gateway, subnet)?;
        self.apply(&config)
    }

    /// Writes an already-validated interface configuration, one register transaction per address.
    pub fn apply(&mut self, config: &InterfaceConfig) -> Result<()> {
        self.ensure_operational()?;
        self.bus.write(regs::SHAR, &config.mac.octets())?;
        self.bus.write(regs::SIPR, &config.ip.octets())?;
        self.bus.write(regs::GAR, &config.gateway.octets())?;
        self.bus.write(regs::SUBR, &config.subnet.octets())?;
        info!(
            "Interface configured: mac {} ip {} gateway {} subnet {}",
            config.mac, config.ip, config.gateway, config.subnet
        );
        Ok(())
    }

    pub fn set_mac(&mut self, mac: &str) -> Result<()> {
        let mac: MacAddress = mac.parse()?;
        self.ensure_operational()?;
        Ok(self.bus.write(regs::SHAR, &mac.octets())?)
    }

    pub fn set_ip(&mut self, ip: &str) -> Result<()> {
        self.write_ipv4(regs::SIPR, ip)
    }

    pub fn set_gateway(&mut self, gateway: &str) -> Result<()> {
        self.write_ipv4(regs::GAR, gateway)
    }

    pub fn set_subnet(&mut self, subnet: &str) -> Result<()> {
        self.write_ipv4(regs::SUBR, subnet)
    }

    fn write_ipv4(&mut self, register: u16, value: &str) -> Result<()> {
        let ip = addr::parse_ipv4(value)?;
        self.ensure_operational()?;
        Ok(self.bus.write(register, &ip.octets())?)
    }

    /// Reads back the hardware address, e.g. to verify a [Self::configure] call.
    pub fn read_mac(&mut self) -> Result<MacAddress> {
        self.ensure_operational()?;
        let mut octets = [0u8; 6];
        self.bus.read(regs::SHAR, &mut octets)?;
        Ok(MacAddress(octets))
    }

    pub fn read_ip(&mut self) -> Result<Ipv4Addr> {
        self.read_ipv4(regs::SIPR)
    }

    pub fn read_gateway(&mut self) -> Result<Ipv4Addr> {
        self.read_ipv4(regs::GAR)
    }

    pub fn read_subnet(&mut self) -> Result<Ipv4Addr> {
        self.read_ipv4(regs::SUBR)
    }

    fn read_ipv4(&mut self, register: u16) -> Result<Ipv4Addr> {
        self.ensure_operational()?;
        let mut octets = [0u8; 4];
        self.bus.read(register, &mut octets)?;
        Ok(Ipv4Addr::from(octets))
    }

    /// Direct bus access for the socket layer. Only valid while operational.
    pub(crate) fn bus(&mut self) -> Result<&mut B> {
        self.ensure_operational()?;
        Ok(&mut self.bus)
    }

    /// Gives back the bus and delay provider.
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }
}
