//! Bus Response Engine.
//!
//! The only code on the real-time context. Each poll takes one atomic sample
//! of all GPIOs and advances a three-state machine:
//!
//! - `Waiting`: strobe released. On assertion, resolve the address, fetch the
//!   preconverted byte from the active image and drive it in one masked store.
//! - `Driving`: byte on the bus, waiting for the strobe to release. Address
//!   triggers and NMI release happen on that release, never mid-cycle.
//! - `SkippingWrite`: a write cycle is in progress and is ignored.
//!
//! Nothing here allocates, locks or logs.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    address::LogicalAddress,
    bank::RomBankStore,
    bus::LineBus,
    config::AddressTrigger,
    error::Error,
    lines::{LineId, LineSnapshot, line_mask},
    switch::{ButtonEdge, Debouncer, Qualification},
    tables::BusTables,
};

/// Idle polls between checks of the stop flag in [`BusEngine::run_until`].
const STOP_CHECK_EVERY: u32 = 4096;

/// One completed observation of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// `value` is the byte as driven on the wire (preconverted).
    Read { address: LogicalAddress, value: u8 },
    WriteIgnored { address: LogicalAddress },
}

/// Counters accumulated by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineReport {
    pub reads: u64,
    pub writes_ignored: u64,
    pub triggers_fired: u64,
    pub nmi_pulses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Waiting,
    Driving { address: LogicalAddress },
    SkippingWrite,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedTrigger {
    address: LogicalAddress,
    slot: usize,
}

/// Button debounced inside the poll loop, driving NMI directly.
#[derive(Debug, Clone)]
struct InlineNmi {
    line: LineId,
    button_mask: u32,
    debouncer: Debouncer,
    asserted: bool,
}

impl InlineNmi {
    fn sample<B: LineBus + ?Sized>(
        &mut self,
        bus: &B,
        snapshot: LineSnapshot,
        report: &mut EngineReport,
    ) {
        let pressed = snapshot.is_high(self.button_mask);
        if let Some(ButtonEdge::Pressed) = self.debouncer.sample(Default::default(), pressed) {
            bus.set_line(self.line, false);
            self.asserted = true;
            report.nmi_pulses += 1;
        }
    }

    // NMI stays low for exactly one completed read cycle.
    fn cycle_done<B: LineBus + ?Sized>(&mut self, bus: &B) {
        if self.asserted {
            bus.set_line(self.line, true);
            self.asserted = false;
        }
    }
}

pub struct BusEngine<'a, B: LineBus + ?Sized> {
    bus: &'a B,
    tables: &'a BusTables,
    store: &'a RomBankStore,
    triggers: Vec<ResolvedTrigger>,
    nmi: Option<InlineNmi>,
    state: EngineState,
    report: EngineReport,
}

impl<'a, B: LineBus + ?Sized> BusEngine<'a, B> {
    pub fn new(bus: &'a B, tables: &'a BusTables, store: &'a RomBankStore) -> Self {
        Self {
            bus,
            tables,
            store,
            triggers: Vec::new(),
            nmi: None,
            state: EngineState::Waiting,
            report: EngineReport::default(),
        }
    }

    /// Resolves trigger targets to store slots so the hot path never searches
    /// by name.
    pub fn with_triggers(mut self, triggers: &[AddressTrigger]) -> Result<Self, Error> {
        self.triggers = triggers
            .iter()
            .map(|t| {
                self.store
                    .slot_of(t.target)
                    .map(|slot| ResolvedTrigger {
                        address: t.address,
                        slot,
                    })
                    .ok_or_else(|| Error::UnknownImage {
                        name: format!("{:?}", t.target),
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Fires NMI once `samples` consecutive polls have seen the button high.
    pub fn with_inline_nmi(mut self, samples: u32) -> Result<Self, Error> {
        let map = self.tables.line_map();
        let line = map.nmi.ok_or(Error::MissingLine { role: "nmi" })?;
        let button = map.user_button.ok_or(Error::MissingLine {
            role: "user_button",
        })?;
        self.nmi = Some(InlineNmi {
            line,
            button_mask: line_mask(button),
            debouncer: Debouncer::new(Qualification::Samples(samples)),
            asserted: false,
        });
        Ok(self)
    }

    pub fn report(&self) -> EngineReport {
        self.report
    }

    /// One sample, one state transition. Returns the cycle that started on
    /// this poll, if any.
    #[inline]
    pub fn poll(&mut self) -> Option<Cycle> {
        let snapshot = self.bus.sample();
        match self.state {
            EngineState::Waiting => {
                if !self.tables.read_asserted(snapshot) {
                    if let Some(nmi) = self.nmi.as_mut() {
                        nmi.sample(self.bus, snapshot, &mut self.report);
                    }
                    return None;
                }
                let address = self.tables.resolve(snapshot);
                if self.tables.write_asserted(snapshot) {
                    self.state = EngineState::SkippingWrite;
                    self.report.writes_ignored += 1;
                    return Some(Cycle::WriteIgnored { address });
                }
                let value = self.store.active().byte(address);
                self.bus
                    .drive(self.tables.data_mask(), self.tables.data_bits(value));
                self.state = EngineState::Driving { address };
                self.report.reads += 1;
                Some(Cycle::Read { address, value })
            }
            EngineState::Driving { address } => {
                if self.tables.read_asserted(snapshot) {
                    return None;
                }
                self.state = EngineState::Waiting;
                if !self.triggers.is_empty() {
                    self.fire_trigger(address);
                }
                if let Some(nmi) = self.nmi.as_mut() {
                    nmi.cycle_done(self.bus);
                    nmi.sample(self.bus, snapshot, &mut self.report);
                }
                None
            }
            EngineState::SkippingWrite => {
                if !self.tables.read_asserted(snapshot) {
                    self.state = EngineState::Waiting;
                }
                None
            }
        }
    }

    fn fire_trigger(&mut self, address: LogicalAddress) {
        if let Some(trigger) = self.triggers.iter().find(|t| t.address == address) {
            self.store.activate_slot(trigger.slot);
            self.report.triggers_fired += 1;
        }
    }

    /// Polls until `stop` is set. The flag is only read every few thousand
    /// idle polls.
    pub fn run_until(&mut self, stop: &AtomicBool) -> EngineReport {
        let mut idle: u32 = 0;
        loop {
            if self.poll().is_some() {
                continue;
            }
            idle = idle.wrapping_add(1);
            if idle.is_multiple_of(STOP_CHECK_EVERY) && stop.load(Ordering::Relaxed) {
                return self.report;
            }
        }
    }
}
