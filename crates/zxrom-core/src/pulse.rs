//! Interrupt-synchronised pulse generation.
//!
//! The lower-border board fires NMI a fixed delay after every host frame
//! interrupt. On the microcontroller this lives in a programmable I/O block
//! clocked at `tick`; [`PulseSequencer`] is the same behaviour as a pure
//! per-tick state machine, and [`PulseGenerator`] is the seam a backend
//! implements to run it independently of the bus engine.

use std::time::Duration;

use crate::{error::Error, lines::LineId};

/// Timing of the generated pulse train, in sequencer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    pub tick: Duration,
    /// Nominal interval between sync edges. The sequencer follows the
    /// observed edges, so this only bounds `delay_ticks + width_ticks`.
    pub period_ticks: u32,
    /// Wait between the sync edge and the pulse.
    pub delay_ticks: u32,
    pub width_ticks: u32,
}

impl PulseTiming {
    /// 50 Hz frame interrupt, 8 µs ticks (125 MHz / 1000), pulse at the start
    /// of the lower border 256 lines into the frame.
    pub const LOWER_BORDER: Self = Self {
        tick: Duration::from_micros(8),
        period_ticks: 2496,
        delay_ticks: 2048,
        width_ticks: 4,
    };

    pub fn validate(&self) -> Result<(), Error> {
        let busy = self.delay_ticks.saturating_add(self.width_ticks);
        if self.width_ticks == 0 || busy >= self.period_ticks {
            return Err(Error::InvalidPulseTiming {
                period_ticks: self.period_ticks,
                width_ticks: self.width_ticks,
            });
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        self.tick * self.period_ticks
    }

    pub fn delay(&self) -> Duration {
        self.tick * self.delay_ticks
    }

    pub fn width(&self) -> Duration {
        self.tick * self.width_ticks
    }
}

impl Default for PulseTiming {
    fn default() -> Self {
        Self::LOWER_BORDER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncEdge {
    #[default]
    Falling,
    Rising,
}

/// Where the generator takes its phase from and where the pulse goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSource {
    pub sync: LineId,
    pub edge: SyncEdge,
    /// Output line, idle high, pulled low for the pulse.
    pub output: LineId,
}

/// A pulse backend running beside the bus engine.
pub trait PulseGenerator {
    fn start(&mut self, timing: PulseTiming, source: SyncSource) -> Result<(), Error>;

    fn is_running(&self) -> bool;

    /// Stops the pulse train and leaves the output idle.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqPhase {
    Armed,
    Delaying { remaining: u32 },
    Pulsing { remaining: u32 },
}

/// One pulse per sync edge, `delay_ticks` after the edge and `width_ticks`
/// long. Edges seen while a pulse is still pending or being driven are
/// ignored; the next edge after it re-arms the sequence.
#[derive(Debug, Clone)]
pub struct PulseSequencer {
    timing: PulseTiming,
    edge: SyncEdge,
    last_sync: bool,
    phase: SeqPhase,
    pulses: u64,
}

impl PulseSequencer {
    pub fn new(timing: PulseTiming, edge: SyncEdge) -> Self {
        Self {
            timing,
            edge,
            last_sync: edge == SyncEdge::Falling,
            phase: SeqPhase::Armed,
            pulses: 0,
        }
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    /// Advances one tick with the sync line at `sync_level`. Returns the
    /// output level for this tick (`false` = pulse).
    pub fn clock(&mut self, sync_level: bool) -> bool {
        let edge = match self.edge {
            SyncEdge::Falling => self.last_sync && !sync_level,
            SyncEdge::Rising => !self.last_sync && sync_level,
        };
        self.last_sync = sync_level;

        if edge && self.phase == SeqPhase::Armed {
            self.phase = SeqPhase::Delaying {
                remaining: self.timing.delay_ticks,
            };
        }

        if let SeqPhase::Delaying { remaining: 0 } = self.phase {
            self.phase = SeqPhase::Pulsing {
                remaining: self.timing.width_ticks,
            };
            self.pulses += 1;
        }
        match self.phase {
            SeqPhase::Armed => true,
            SeqPhase::Delaying { remaining } => {
                self.phase = SeqPhase::Delaying {
                    remaining: remaining - 1,
                };
                true
            }
            SeqPhase::Pulsing { remaining } => {
                self.phase = if remaining <= 1 {
                    SeqPhase::Armed
                } else {
                    SeqPhase::Pulsing {
                        remaining: remaining - 1,
                    }
                };
                false
            }
        }
    }
}
