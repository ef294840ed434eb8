//! Physical line assignments.
//!
//! A [`LineMap`] records which microcontroller GPIO carries which logical
//! signal. The address and data buses are wired in whatever order suited the
//! board layout, so neither bus appears on the GPIOs in bit order; the tables in
//! [`crate::address`] and [`crate::data`] undo that scramble.

use crate::error::Error;

/// Number of address lines on a 16 KiB ROM socket.
pub const ADDRESS_LINES: usize = 14;
/// Number of data lines on a byte-wide ROM socket.
pub const DATA_LINES: usize = 8;
/// Width of one atomic GPIO sample.
pub const GPIO_COUNT: u8 = 32;

/// GPIO number of a single line.
pub type LineId = u8;

/// One atomic read of every GPIO input at a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LineSnapshot(pub u32);

impl LineSnapshot {
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `true` when every line in `mask` is high.
    #[inline]
    pub const fn is_high(self, mask: u32) -> bool {
        self.0 & mask == mask
    }

    /// `true` when every line in `mask` is low.
    #[inline]
    pub const fn is_low(self, mask: u32) -> bool {
        self.0 & mask == 0
    }

    #[inline]
    pub const fn level(self, line: LineId) -> bool {
        self.0 & (1 << line) != 0
    }
}

#[inline]
pub const fn line_mask(line: LineId) -> u32 {
    1u32 << line
}

#[inline]
pub(crate) fn optional_mask(line: Option<LineId>) -> u32 {
    line.map_or(0, line_mask)
}

/// Wiring of one board revision.
///
/// Polarities are fixed by the board design:
/// - `rom_access`: low while the host reads the ROM window (A14, A15 and MREQ
///   all low, decoded in external logic);
/// - `write_enable`: low during a write cycle, when the board routes it;
/// - `user_button`: pulled down, driven high by the switch;
/// - `reset`: high holds the host CPU in reset;
/// - `nmi`: idle high, pulled low to interrupt the host;
/// - `int_sync`: the host's periodic frame interrupt, active low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMap {
    /// GPIO for A0..A13, indexed by address bit.
    pub address: [LineId; ADDRESS_LINES],
    /// GPIO for D0..D7, indexed by data bit.
    pub data: [LineId; DATA_LINES],
    pub rom_access: LineId,
    pub write_enable: Option<LineId>,
    pub user_button: Option<LineId>,
    pub reset: LineId,
    pub nmi: Option<LineId>,
    pub int_sync: Option<LineId>,
    pub status_led: LineId,
}

const ZX_PICO_ADDRESS: [LineId; ADDRESS_LINES] =
    [11, 12, 13, 14, 20, 21, 22, 26, 19, 18, 17, 16, 10, 9];
const ZX_PICO_DATA: [LineId; DATA_LINES] = [0, 1, 2, 4, 6, 3, 5, 7];

impl LineMap {
    /// The ROM cartridge board: button on GP27, no NMI wiring.
    pub const ZX_PICO: Self = Self {
        address: ZX_PICO_ADDRESS,
        data: ZX_PICO_DATA,
        rom_access: 8,
        write_enable: None,
        user_button: Some(27),
        reset: 28,
        nmi: None,
        int_sync: None,
        status_led: 25,
    };

    /// Same board with the NMI transistor fitted on GP15.
    pub const ZX_PICO_NMI: Self = Self {
        nmi: Some(15),
        ..Self::ZX_PICO
    };

    /// Lower border experiment: GP15 listens to the host INT line and GP27
    /// drives NMI instead of reading the button.
    pub const ZX_PICO_LOWER_BORDER: Self = Self {
        user_button: None,
        nmi: Some(27),
        int_sync: Some(15),
        ..Self::ZX_PICO
    };

    /// Mask of every GPIO carrying an address bit.
    pub fn address_mask(&self) -> u32 {
        self.address.iter().fold(0, |acc, &pin| acc | line_mask(pin))
    }

    /// Mask of every GPIO carrying a data bit.
    pub fn data_mask(&self) -> u32 {
        self.data.iter().fold(0, |acc, &pin| acc | line_mask(pin))
    }

    /// Lowest GPIO of the data window.
    pub fn data_base(&self) -> LineId {
        self.data.iter().copied().min().unwrap_or(0)
    }

    /// Checks that every line fits the sample width, no GPIO is claimed twice
    /// and the data pins occupy one contiguous 8-line window.
    pub fn validate(&self) -> Result<(), Error> {
        let mut claimed = 0u32;
        let mut claim = |role: &'static str, pin: LineId| -> Result<(), Error> {
            if pin >= GPIO_COUNT {
                return Err(Error::LineOutOfRange { role, line: pin });
            }
            if claimed & line_mask(pin) != 0 {
                return Err(Error::DuplicateLine { role, line: pin });
            }
            claimed |= line_mask(pin);
            Ok(())
        };

        for &pin in &self.address {
            claim("address", pin)?;
        }
        for &pin in &self.data {
            claim("data", pin)?;
        }
        claim("rom_access", self.rom_access)?;
        claim("reset", self.reset)?;
        claim("status_led", self.status_led)?;
        if let Some(pin) = self.write_enable {
            claim("write_enable", pin)?;
        }
        if let Some(pin) = self.user_button {
            claim("user_button", pin)?;
        }
        if let Some(pin) = self.nmi {
            claim("nmi", pin)?;
        }
        if let Some(pin) = self.int_sync {
            claim("int_sync", pin)?;
        }

        let base = self.data_base();
        if self.data_mask() != 0xFFu32 << base {
            return Err(Error::DataWindowNotContiguous { base });
        }
        Ok(())
    }
}

impl Default for LineMap {
    fn default() -> Self {
        Self::ZX_PICO
    }
}
