//! Data bus bit reordering.
//!
//! D0..D7 leave the board on GPIOs in a different order than the bits of a
//! byte. Every ROM byte is permuted once at startup so the engine can write it
//! to the data window unchanged.

use crate::{
    error::Error,
    lines::{DATA_LINES, LineMap},
};

/// Fixed byte permutation for one board's data wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPreconverter {
    table: [u8; 256],
    positions: [u8; DATA_LINES],
}

impl DataPreconverter {
    /// Logical bit `n` of a byte moves to position `data[n] - base` of the
    /// output, where `base` is the lowest data GPIO. Fails unless `map`
    /// passes [`LineMap::validate`].
    pub fn new(map: &LineMap) -> Result<Self, Error> {
        map.validate()?;
        let base = map.data_base();
        let positions = map.data.map(|pin| pin - base);

        let mut table = [0u8; 256];
        for (value, slot) in table.iter_mut().enumerate() {
            *slot = positions
                .iter()
                .enumerate()
                .filter(|&(bit, _)| value & (1 << bit) != 0)
                .fold(0u8, |acc, (_, &pos)| acc | (1 << pos));
        }

        Ok(Self { table, positions })
    }

    #[inline]
    pub fn preconvert(&self, byte: u8) -> u8 {
        self.table[usize::from(byte)]
    }

    /// Rewrites `bytes` in place.
    pub fn preconvert_slice(&self, bytes: &mut [u8]) {
        for byte in bytes {
            *byte = self.preconvert(*byte);
        }
    }

    /// Recovers the logical byte from a value seen on the data window. Only a
    /// bus observer needs this; the engine never converts back.
    pub fn restore(&self, wire: u8) -> u8 {
        self.positions
            .iter()
            .enumerate()
            .filter(|&(_, &pos)| wire & (1 << pos) != 0)
            .fold(0u8, |acc, (bit, _)| acc | (1 << bit))
    }
}
