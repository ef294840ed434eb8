//! In-memory GPIO bank.
//!
//! Inputs are what the host side of the socket drives (address, strobe,
//! button, INT); outputs are what the board drives (data window, reset, NMI,
//! LED). A test or the simulator plays the host by writing inputs and reading
//! outputs back.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::LineBus;
use crate::lines::{LineId, LineMap, LineSnapshot, line_mask};

#[derive(Debug)]
pub struct SimBus {
    inputs: AtomicU32,
    outputs: AtomicU32,
    /// Only drives touching these lines are counted.
    watch: u32,
    drives: AtomicU64,
}

fn merge(word: &AtomicU32, mask: u32, bits: u32) -> u32 {
    let mut current = word.load(Ordering::Acquire);
    loop {
        let next = (current & !mask) | (bits & mask);
        match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl SimBus {
    pub fn new(inputs: u32, outputs: u32) -> Self {
        Self {
            inputs: AtomicU32::new(inputs),
            outputs: AtomicU32::new(outputs),
            watch: u32::MAX,
            drives: AtomicU64::new(0),
        }
    }

    /// Bus with every active-low input released and NMI idle high. Only data
    /// window drives are counted.
    pub fn idle(map: &LineMap) -> Self {
        let mut inputs = line_mask(map.rom_access);
        for line in [map.write_enable, map.int_sync].into_iter().flatten() {
            inputs |= line_mask(line);
        }
        let outputs = map.nmi.map_or(0, line_mask);
        Self {
            watch: map.data_mask(),
            ..Self::new(inputs, outputs)
        }
    }

    pub fn set_inputs(&self, mask: u32, bits: u32) {
        merge(&self.inputs, mask, bits);
    }

    pub fn set_input(&self, line: LineId, high: bool) {
        let mask = line_mask(line);
        self.set_inputs(mask, if high { mask } else { 0 });
    }

    pub fn outputs(&self) -> u32 {
        self.outputs.load(Ordering::Acquire)
    }

    pub fn output_level(&self, line: LineId) -> bool {
        self.outputs() & line_mask(line) != 0
    }

    /// Number of watched `drive` calls so far. A simulated host waits for this
    /// to move before it samples the data window.
    pub fn drive_count(&self) -> u64 {
        self.drives.load(Ordering::Acquire)
    }
}

impl LineBus for SimBus {
    #[inline]
    fn sample(&self) -> LineSnapshot {
        LineSnapshot(self.inputs.load(Ordering::Acquire))
    }

    #[inline]
    fn drive(&self, mask: u32, bits: u32) {
        merge(&self.outputs, mask, bits);
        if mask & self.watch != 0 {
            self.drives.fetch_add(1, Ordering::AcqRel);
        }
    }
}
