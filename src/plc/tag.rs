//! Symbolic tags bound to fixed controller addresses

use std::fmt;

/// A named boolean bit inside a data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub name: &'static str,
    /// Data block number
    pub db: u16,
    /// Byte offset inside the data block
    pub byte: u32,
    /// Bit index inside the byte (0-7)
    pub bit: u8,
}

/// The vision system's machine stop request: DB1, byte 0, bit 0
pub const VISION_STOP: Tag = Tag::bit("VISION_STOP", 1, 0, 0);

impl Tag {
    pub const fn bit(name: &'static str, db: u16, byte: u32, bit: u8) -> Self {
        Self { name, db, byte, bit }
    }

    /// Bit address as carried in an S7 request item (byte * 8 + bit)
    pub fn bit_address(&self) -> u32 {
        (self.byte << 3) | u32::from(self.bit & 0x07)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (DB{},X{}.{})", self.name, self.db, self.byte, self.bit)
    }
}
