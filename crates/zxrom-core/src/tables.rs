use tracing::info;

use crate::{
    address::{AddressIndirectionTable, AddressPacker, LogicalAddress},
    data::DataPreconverter,
    error::Error,
    lines::{LineMap, LineSnapshot, line_mask, optional_mask},
};

/// Everything the engine's hot path needs from the line map, precomputed.
#[derive(Debug, Clone)]
pub struct BusTables {
    map: LineMap,
    packer: AddressPacker,
    addresses: AddressIndirectionTable,
    data: DataPreconverter,
    data_mask: u32,
    data_shift: u32,
    strobe_mask: u32,
    write_mask: u32,
}

impl BusTables {
    pub fn build(map: &LineMap) -> Result<Self, Error> {
        let packer = AddressPacker::new(map)?;
        let addresses = AddressIndirectionTable::build(map, &packer);
        let tables = Self {
            map: *map,
            packer,
            addresses,
            data: DataPreconverter::new(map)?,
            data_mask: map.data_mask(),
            data_shift: u32::from(map.data_base()),
            strobe_mask: line_mask(map.rom_access),
            write_mask: optional_mask(map.write_enable),
        };
        info!(
            address_runs = tables.packer.run_count(),
            data_base = tables.data_shift,
            "bus tables built"
        );
        Ok(tables)
    }

    pub fn line_map(&self) -> &LineMap {
        &self.map
    }

    pub fn preconverter(&self) -> &DataPreconverter {
        &self.data
    }

    /// Address the host is requesting in `snapshot`.
    #[inline]
    pub fn resolve(&self, snapshot: LineSnapshot) -> LogicalAddress {
        self.addresses.lookup(self.packer.pack(snapshot))
    }

    #[inline]
    pub fn read_asserted(&self, snapshot: LineSnapshot) -> bool {
        snapshot.is_low(self.strobe_mask)
    }

    /// Always `false` on boards that do not route the write line.
    #[inline]
    pub fn write_asserted(&self, snapshot: LineSnapshot) -> bool {
        self.write_mask != 0 && snapshot.is_low(self.write_mask)
    }

    pub fn data_mask(&self) -> u32 {
        self.data_mask
    }

    /// GPIO bits for a preconverted byte.
    #[inline]
    pub fn data_bits(&self, wire: u8) -> u32 {
        u32::from(wire) << self.data_shift
    }

    /// Preconverted byte currently on the data window of `outputs`.
    pub fn wire_byte(&self, outputs: u32) -> u8 {
        ((outputs & self.data_mask) >> self.data_shift) as u8
    }
}
