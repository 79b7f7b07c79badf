//! Table-free CCITT CRC-16.
//!
//! Each input byte is folded into the accumulator one nibble at a time
//! using the reflected polynomial constant `0x1081`, which yields the
//! CCITT (Kermit) CRC-16 without a 512-byte lookup table. With a zero
//! seed the check value over `"123456789"` is `0x2189`.

/// Polynomial multiplier for a single reflected nibble step.
const NIBBLE_POLY: u16 = 0x1081;

/// Incremental CRC-16 accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    crc: u16,
}

impl Crc16 {
    /// Create an accumulator starting from `seed`.
    #[must_use]
    pub const fn new(seed: u16) -> Self {
        Self { crc: seed }
    }

    /// Feed bytes into the accumulator.
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.crc;
        for &byte in data {
            let byte = u16::from(byte);
            crc = (crc >> 4) ^ (((crc ^ byte) & 0x000F) * NIBBLE_POLY);
            crc = (crc >> 4) ^ (((crc ^ (byte >> 4)) & 0x000F) * NIBBLE_POLY);
        }
        self.crc = crc;
    }

    /// Current accumulator value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.crc
    }

    /// Little-endian encoding of the accumulator. No final XOR is applied.
    #[must_use]
    pub const fn finalize(self) -> [u8; 2] {
        self.crc.to_le_bytes()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new(0)
    }
}
