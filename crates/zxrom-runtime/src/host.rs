//! A simulated host CPU for [`SimBus`].
//!
//! Reads go through the same scrambled wiring a real Spectrum would see:
//! the address is scattered onto the address GPIOs, the strobe is pulled low,
//! and the byte on the data window is unscrambled once the engine has driven
//! it.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use zxrom_core::{
    LineMap, LogicalAddress,
    address::scatter,
    bus::SimBus,
    data::DataPreconverter,
    lines::line_mask,
};

use crate::runtime::RuntimeError;

/// Per-attempt wait for the engine to drive the data lines.
const DRIVE_TIMEOUT: Duration = Duration::from_millis(50);
/// Strobe-high time after every cycle, so the engine sees the release.
const RELEASE_GAP: Duration = Duration::from_micros(20);
/// Strobe-high gap before retrying a read the engine did not answer.
const RETRY_GAP: Duration = Duration::from_millis(1);
const MAX_ATTEMPTS: u32 = 20;

pub struct SimHost {
    bus: Arc<SimBus>,
    map: LineMap,
    data: DataPreconverter,
    request_mask: u32,
}

impl SimHost {
    pub fn new(bus: Arc<SimBus>, map: LineMap) -> Result<Self, RuntimeError> {
        Ok(Self {
            bus,
            data: DataPreconverter::new(&map)?,
            request_mask: map.address_mask() | line_mask(map.rom_access),
            map,
        })
    }

    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    pub fn in_reset(&self) -> bool {
        self.bus.output_level(self.map.reset)
    }

    /// Waits for the board to let the host run.
    pub fn wait_for_release(&self, timeout: Duration) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + timeout;
        while self.in_reset() {
            if Instant::now() >= deadline {
                return Err(RuntimeError::HostHeldInReset);
            }
            thread::sleep(Duration::from_micros(200));
        }
        Ok(())
    }

    /// One ROM read cycle, returning the byte in logical bit order.
    ///
    /// A cycle the engine misses (its thread was descheduled across the
    /// strobe release) is retried after a short strobe-high gap, the way a
    /// wait state would stretch it on real hardware.
    pub fn read(&self, address: u16) -> Result<u8, RuntimeError> {
        if self.in_reset() {
            return Err(RuntimeError::HostHeldInReset);
        }
        let lines = scatter(&self.map, LogicalAddress::from_masked(address)).bits();
        for _ in 0..MAX_ATTEMPTS {
            let before = self.bus.drive_count();
            self.bus.set_inputs(self.request_mask, lines);
            let driven = self.wait_for_drive(before);
            let wire = (self.bus.outputs() >> self.map.data_base()) as u8;
            self.bus.set_input(self.map.rom_access, true);
            thread::sleep(RELEASE_GAP);
            if driven {
                return Ok(self.data.restore(wire));
            }
            thread::sleep(RETRY_GAP);
        }
        Err(RuntimeError::BusTimeout { address })
    }

    /// Reads `len` consecutive bytes starting at `start`.
    pub fn read_block(&self, start: u16, len: usize) -> Result<Vec<u8>, RuntimeError> {
        (0..len)
            .map(|offset| self.read(start.wrapping_add(offset as u16)))
            .collect()
    }

    fn wait_for_drive(&self, before: u64) -> bool {
        let deadline = Instant::now() + DRIVE_TIMEOUT;
        let mut spins: u32 = 0;
        while self.bus.drive_count() == before {
            if Instant::now() >= deadline {
                return false;
            }
            std::hint::spin_loop();
            spins = spins.wrapping_add(1);
            if spins.is_multiple_of(512) {
                thread::yield_now();
            }
        }
        true
    }
}
