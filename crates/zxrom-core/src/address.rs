//! Address bus descrambling.
//!
//! The 14 address lines land on the GPIOs out of order and with gaps. Shifting
//! every bit into place costs 14 mask-and-shift steps per read, which does not
//! fit the host's access window. Instead the address GPIOs are first squeezed
//! together (one step per contiguous run of pins, three on the reference
//! board) into a 14-bit *packed pattern*, and a 16384-entry table built at
//! startup maps that pattern back to the address the host put on the bus.

use crate::{
    error::Error,
    lines::{ADDRESS_LINES, LineMap, LineSnapshot, line_mask},
    mem_block::MemBlock,
};

/// Number of addressable bytes in the ROM window.
pub const ADDRESS_SPACE: usize = 1 << ADDRESS_LINES;
/// Mask covering a 14-bit address or packed pattern.
pub const ADDRESS_MASK: u16 = (ADDRESS_SPACE - 1) as u16;

/// Canonical 14-bit address the host CPU is requesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogicalAddress(u16);

impl LogicalAddress {
    /// `None` when `value` does not fit 14 bits.
    pub const fn new(value: u16) -> Option<Self> {
        if value <= ADDRESS_MASK {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Drops everything above A13, the way the ROM socket ignores A14/A15.
    #[inline]
    pub const fn from_masked(value: u16) -> Self {
        Self(value & ADDRESS_MASK)
    }

    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:04X}", self.0)
    }
}

/// One contiguous run of address GPIOs: `(sample & mask) >> shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PackRun {
    mask: u32,
    shift: u32,
}

/// Compacts the address GPIOs of a snapshot into the low 14 bits, keeping
/// their GPIO order (lowest GPIO lands in bit 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPacker {
    runs: [PackRun; ADDRESS_LINES],
    run_count: usize,
}

impl AddressPacker {
    /// Fails unless `map` passes [`LineMap::validate`].
    pub fn new(map: &LineMap) -> Result<Self, Error> {
        map.validate()?;
        let mut pins = map.address;
        pins.sort_unstable();

        let mut runs = [PackRun::default(); ADDRESS_LINES];
        let mut run_count = 0;
        let mut packed_bit = 0u32;
        let mut idx = 0;
        while idx < pins.len() {
            let start = pins[idx];
            let mut len = 1;
            while idx + len < pins.len() && pins[idx + len] == start + len as u8 {
                len += 1;
            }
            let mask = pins[idx..idx + len]
                .iter()
                .fold(0u32, |acc, &pin| acc | line_mask(pin));
            runs[run_count] = PackRun {
                mask,
                shift: u32::from(start) - packed_bit,
            };
            run_count += 1;
            packed_bit += len as u32;
            idx += len;
        }

        Ok(Self { runs, run_count })
    }

    /// Number of mask-and-shift steps per lookup.
    pub fn run_count(&self) -> usize {
        self.run_count
    }

    #[inline]
    pub fn pack(&self, snapshot: LineSnapshot) -> u16 {
        let bits = snapshot.bits();
        let mut packed = 0u32;
        for run in &self.runs[..self.run_count] {
            packed |= (bits & run.mask) >> run.shift;
        }
        packed as u16
    }
}

/// Lines a host address would drive: every address bit scattered onto its GPIO.
pub fn scatter(map: &LineMap, address: LogicalAddress) -> LineSnapshot {
    let value = u32::from(address.value());
    let bits = map
        .address
        .iter()
        .enumerate()
        .fold(0u32, |acc, (bit, &pin)| acc | (((value >> bit) & 1) << pin));
    LineSnapshot(bits)
}

/// Packed raw pattern → logical address, built once before the engine starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressIndirectionTable {
    entries: MemBlock<u16, ADDRESS_SPACE>,
}

impl AddressIndirectionTable {
    /// For every address the host may request, work out which GPIO pattern it
    /// produces, pack that pattern, and remember the address under it.
    pub fn build(map: &LineMap, packer: &AddressPacker) -> Self {
        let mut entries = MemBlock::<u16, ADDRESS_SPACE>::new();
        for value in 0..=ADDRESS_MASK {
            let address = LogicalAddress::from_masked(value);
            let packed = packer.pack(scatter(map, address));
            entries[usize::from(packed) & (ADDRESS_SPACE - 1)] = value;
        }
        Self { entries }
    }

    #[inline]
    pub fn lookup(&self, packed: u16) -> LogicalAddress {
        LogicalAddress(self.entries[usize::from(packed & ADDRESS_MASK)])
    }

    pub fn entries(&self) -> &[u16] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// The hand-tuned packer of the reference board.
    fn reference_pack(gpios: u32) -> u16 {
        (((gpios >> 9) & 0x03F) | ((gpios >> 10) & 0x1FC0) | ((gpios & 0x400_0000) >> 13)) as u16
    }

    #[test]
    fn reference_board_packs_in_three_runs() {
        let packer = AddressPacker::new(&LineMap::ZX_PICO).expect("valid wiring");
        assert_eq!(packer.run_count(), 3);
    }

    #[test]
    fn derived_packer_matches_reference_formula() {
        let map = LineMap::ZX_PICO;
        let packer = AddressPacker::new(&map).expect("valid wiring");
        for value in 0..=ADDRESS_MASK {
            let snapshot = scatter(&map, LogicalAddress::from_masked(value));
            assert_eq!(packer.pack(snapshot), reference_pack(snapshot.bits()));
        }
    }

    #[test]
    fn packing_ignores_non_address_lines() {
        let map = LineMap::ZX_PICO;
        let packer = AddressPacker::new(&map).expect("valid wiring");
        let noise = !map.address_mask();
        assert_eq!(packer.pack(LineSnapshot(noise)), 0);
    }

    #[test]
    fn table_is_a_bijection() {
        let map = LineMap::ZX_PICO;
        let packer = AddressPacker::new(&map).expect("valid wiring");
        let table = AddressIndirectionTable::build(&map, &packer);

        let mut seen = vec![false; ADDRESS_SPACE];
        for &entry in table.entries() {
            assert!(!seen[entry as usize], "address {entry:#06x} mapped twice");
            seen[entry as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn single_address_bits_resolve() {
        let map = LineMap::ZX_PICO;
        let packer = AddressPacker::new(&map).expect("valid wiring");
        let table = AddressIndirectionTable::build(&map, &packer);

        // A0 sits on GP11, the third pin of the first run.
        assert_eq!(packer.pack(LineSnapshot(1 << 11)), 0x0004);
        assert_eq!(table.lookup(0x0004).value(), 0x0001);
        // A13 sits on GP9, the lowest address GPIO.
        assert_eq!(table.lookup(0x0001).value(), 0x2000);
        // A7 sits on GP26, the lone pin of the last run.
        assert_eq!(table.lookup(0x2000).value(), 0x0080);
    }

    #[test]
    fn repeated_address_pins_are_rejected() {
        let map = LineMap {
            address: [9; ADDRESS_LINES],
            ..LineMap::ZX_PICO
        };
        assert!(matches!(
            AddressPacker::new(&map),
            Err(Error::DuplicateLine {
                role: "address",
                line: 9
            })
        ));
    }

    #[test]
    fn logical_address_range() {
        assert!(LogicalAddress::new(0x3FFF).is_some());
        assert!(LogicalAddress::new(0x4000).is_none());
        assert_eq!(LogicalAddress::from_masked(0xC008).value(), 0x0008);
        assert_eq!(LogicalAddress::from_masked(0x1708).to_string(), "$1708");
    }

    proptest! {
        #[test]
        fn lookup_inverts_scatter(value in 0u16..=ADDRESS_MASK) {
            let map = LineMap::ZX_PICO;
            let packer = AddressPacker::new(&map).expect("valid wiring");
            let table = AddressIndirectionTable::build(&map, &packer);
            let address = LogicalAddress::from_masked(value);
            prop_assert_eq!(table.lookup(packer.pack(scatter(&map, address))), address);
        }

        #[test]
        fn any_permuted_wiring_is_a_bijection(
            pins in Just((0u8..32).filter(|p| !(0..=8).contains(p) && *p != 25 && *p != 28).collect::<Vec<_>>())
                .prop_shuffle(),
            sample in 0u16..=ADDRESS_MASK,
        ) {
            let mut address = [0u8; ADDRESS_LINES];
            address.copy_from_slice(&pins[..ADDRESS_LINES]);
            let map = LineMap { address, user_button: None, ..LineMap::ZX_PICO };
            prop_assert!(map.validate().is_ok());

            let packer = AddressPacker::new(&map).expect("valid wiring");
            let table = AddressIndirectionTable::build(&map, &packer);
            let sample = LogicalAddress::from_masked(sample);
            prop_assert_eq!(table.lookup(packer.pack(scatter(&map, sample))), sample);
        }
    }
}
