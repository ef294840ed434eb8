//! Board configuration presets.
//!
//! Each [`Variant`] corresponds to one firmware build of the ROM board. A
//! [`BoardConfig`] is fixed before the tables are built and never changes
//! while the engine runs.

use std::{fmt, str::FromStr, time::Duration};

use bitflags::bitflags;

use crate::{
    address::LogicalAddress,
    bank::ImageSelector,
    image::DEFAULT_LABEL_OFFSET,
    lines::LineMap,
    pulse::{PulseTiming, SyncEdge, SyncSource},
    switch::{Qualification, SwitchConfig, SwitchMode},
};

bitflags! {
    /// Subsystems a variant switches on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u8 {
        /// Supervisor cycles banks on a debounced button press.
        const BUTTON_SWITCH = 1 << 0;
        /// Presses go through the announcement image first.
        const ANNOUNCE = 1 << 1;
        /// The engine pages images on specific read addresses.
        const ADDRESS_TRIGGERS = 1 << 2;
        /// The engine debounces the button itself and fires NMI.
        const INLINE_NMI = 1 << 3;
        /// NMI pulses locked to the host frame interrupt.
        const SYNC_PULSES = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    /// Button press shows the next bank's name, then switches to it.
    #[default]
    Cycler,
    /// Button press switches straight to the next bank.
    CyclerDirect,
    /// 48K ROM with Interface 1 paging on the shadow ROM entry points.
    Interface1,
    /// Single image; the button raises one NMI per press.
    ButtonNmi,
    /// Single image; NMI fires at the start of the lower border every frame.
    LowerBorder,
}

impl Variant {
    pub const ALL: [Self; 5] = [
        Self::Cycler,
        Self::CyclerDirect,
        Self::Interface1,
        Self::ButtonNmi,
        Self::LowerBorder,
    ];

    pub fn features(self) -> Features {
        match self {
            Self::Cycler => Features::BUTTON_SWITCH | Features::ANNOUNCE,
            Self::CyclerDirect => Features::BUTTON_SWITCH,
            Self::Interface1 => Features::ADDRESS_TRIGGERS,
            Self::ButtonNmi => Features::INLINE_NMI,
            Self::LowerBorder => Features::SYNC_PULSES,
        }
    }

    pub fn line_map(self) -> LineMap {
        match self {
            Self::Cycler | Self::CyclerDirect | Self::Interface1 => LineMap::ZX_PICO,
            Self::ButtonNmi => LineMap::ZX_PICO_NMI,
            Self::LowerBorder => LineMap::ZX_PICO_LOWER_BORDER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cycler => "cycler",
            Self::CyclerDirect => "cycler-direct",
            Self::Interface1 => "interface1",
            Self::ButtonNmi => "button-nmi",
            Self::LowerBorder => "lower-border",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown board variant {s:?}"))
    }
}

/// Serve `target` from the read after the one at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTrigger {
    pub address: LogicalAddress,
    pub target: ImageSelector,
}

impl AddressTrigger {
    pub const fn new(address: u16, target: ImageSelector) -> Self {
        Self {
            address: LogicalAddress::from_masked(address),
            target,
        }
    }
}

/// Interface 1 shadow ROM paging: in on the RST 8 and CLOSE# entry points,
/// out on the return at 0x0700.
pub const INTERFACE1_TRIGGERS: [AddressTrigger; 3] = [
    AddressTrigger::new(0x0008, ImageSelector::Aux(0)),
    AddressTrigger::new(0x1708, ImageSelector::Aux(0)),
    AddressTrigger::new(0x0700, ImageSelector::Bank(0)),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub variant: Variant,
    pub lines: LineMap,
    pub debounce: Qualification,
    /// Reset hold after the button is let go.
    pub settle: Duration,
    /// How long the announcement image runs before the real switch.
    pub announce_display: Duration,
    /// Reset pulse around a deferred or forced switch.
    pub commit_reset: Duration,
    /// Reset hold at power-up, before the host may fetch.
    pub startup_reset: Duration,
    /// Supervisor loop sleep.
    pub poll_interval: Duration,
    /// Consecutive engine polls with the button high before NMI fires.
    pub inline_nmi_samples: u32,
    pub label_offset: usize,
    pub triggers: Vec<AddressTrigger>,
    pub pulse: PulseTiming,
}

impl BoardConfig {
    pub fn for_variant(variant: Variant) -> Self {
        let mut config = Self {
            variant,
            lines: variant.line_map(),
            debounce: Qualification::default(),
            settle: Duration::from_millis(600),
            announce_display: Duration::from_millis(1200),
            commit_reset: Duration::from_millis(5),
            startup_reset: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            inline_nmi_samples: 1000,
            label_offset: DEFAULT_LABEL_OFFSET,
            triggers: Vec::new(),
            pulse: PulseTiming::default(),
        };
        match variant {
            Variant::Interface1 => config.triggers = INTERFACE1_TRIGGERS.to_vec(),
            Variant::ButtonNmi => config.startup_reset = Duration::from_millis(5),
            _ => {}
        }
        config
    }

    pub fn features(&self) -> Features {
        self.variant.features()
    }

    /// Button switcher settings, when this variant has one.
    pub fn switch_config(&self) -> Option<SwitchConfig> {
        let features = self.features();
        if !features.contains(Features::BUTTON_SWITCH) {
            return None;
        }
        let mode = if features.contains(Features::ANNOUNCE) {
            SwitchMode::Announce {
                display: self.announce_display,
            }
        } else {
            SwitchMode::Immediate
        };
        Some(SwitchConfig {
            mode,
            debounce: self.debounce,
            settle: self.settle,
        })
    }

    /// Pulse generator wiring, when this variant has one and the lines exist.
    pub fn sync_source(&self) -> Option<SyncSource> {
        if !self.features().contains(Features::SYNC_PULSES) {
            return None;
        }
        Some(SyncSource {
            sync: self.lines.int_sync?,
            edge: SyncEdge::Falling,
            output: self.lines.nmi?,
        })
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::for_variant(Variant::default())
    }
}
