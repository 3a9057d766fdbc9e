//! Parsing and formatting of the link- and network-layer addresses the controller stores in its
//! common registers.

use core::net::Ipv4Addr;
use core::str::FromStr;

/// Returned when a caller-supplied address string does not have the expected shape: four decimal
/// octets for IPv4-family fields, six hexadecimal octets for a MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAddressFormat {
    /// Which kind of address was being parsed, for diagnostics.
    pub expected: AddressKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Ipv4,
    Mac,
}

impl core::fmt::Display for InvalidAddressFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.expected {
            AddressKind::Ipv4 => write!(f, "invalid IPv4 address format (expected a.b.c.d)"),
            AddressKind::Mac => write!(f, "invalid MAC address format (expected AA:BB:CC:DD:EE:FF)"),
        }
    }
}

/// Parses a dotted-quad IPv4 address such as `192.168.1.100`.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, InvalidAddressFormat> {
    Ipv4Addr::from_str(s.trim()).map_err(|_| InvalidAddressFormat {
        expected: AddressKind::Ipv4,
    })
}

/// A 6-octet hardware address. Displays as upper-case, colon-separated hex (`AA:BB:CC:DD:EE:FF`),
/// which is also the notation the controller's read-back is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = InvalidAddressFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = InvalidAddressFormat {
            expected: AddressKind::Mac,
        };
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(err)?;
            if part.is_empty() || part.len() > 2 {
                return Err(err);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| err)?;
        }
        // Seven or more groups is just as malformed as five.
        if parts.next().is_some() {
            return Err(err);
        }
        Ok(MacAddress(octets))
    }
}

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}
