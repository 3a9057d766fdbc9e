//! Debug formatting helpers for bus transactions and ICMP messages.

/// A wrapper struct whose [core::fmt::Display] implementation prints the provided data in rows,
/// with each row containing 16 bytes of data in up to two groups of up to 8 bytes each,
/// with each byte formatted by the provided formatting function.
struct FormatDataInRowsAndGroups<'a, F> {
    data: &'a [u8],
    elem_formatter: F,
}
impl<'a, F, R> core::fmt::Display for FormatDataInRowsAndGroups<'a, F>
where
    F: Fn(&'a u8) -> R,
    R: core::fmt::Display,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (row_idx, row_values) in self.data.chunks(16).enumerate() {
            if row_idx > 0 {
                writeln!(f)?;
            }
            let offset = row_idx * 16;
            write!(f, "{offset:04x}: ")?;

            // Groups of 8 are separated by two spaces, elements within a group by one.
            for (group_idx, group_values) in row_values.chunks(8).enumerate() {
                if group_idx > 0 {
                    write!(f, "  ")?;
                }
                for (elem_idx, elem) in group_values.iter().enumerate() {
                    if elem_idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", (self.elem_formatter)(elem))?;
                }
            }
        }
        Ok(())
    }
}

/// A byte formatter that prints the value in hexadecimal format.
struct HexFormatter<'a>(&'a u8);
impl<'a> core::fmt::Display for HexFormatter<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// Logs the given data buffer in a human-readable format, with each byte printed in its hexadecimal
/// representation, similar to how Wireshark prints network packets.
///
/// Bus transactions are frequent, so nothing is formatted unless `log_level` is enabled.
pub fn log_data_hex(log_level: log::Level, data: &[u8]) {
    if !log::log_enabled!(log_level) || data.is_empty() {
        return;
    }
    log::log!(
        log_level,
        "Length: {} bytes\n{}",
        data.len(),
        FormatDataInRowsAndGroups {
            data,
            elem_formatter: HexFormatter
        }
    );
}

/// Formats the fixed 8-byte header of an ICMP echo message.
pub struct FormatIcmpEcho<'a>(pub &'a [u8]);
impl<'a> core::fmt::Display for FormatIcmpEcho<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let data = self.0;
        if data.len() < 8 {
            return write!(f, "IcmpMessage(truncated, len: {})", data.len());
        }
        write!(
            f,
            "IcmpMessage(len: {}, type {}, code {}, checksum 0x{:02X}{:02X}, ident 0x{:02X}{:02X}, \
                seq {})",
            data.len(),
            data[0],
            data[1],
            data[2],
            data[3],
            data[4],
            data[5],
            u16::from_be_bytes([data[6], data[7]]),
        )
    }
}
