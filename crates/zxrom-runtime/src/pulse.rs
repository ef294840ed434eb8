//! Pulse generator on a dedicated OS thread.
//!
//! Clocks a [`PulseSequencer`] once per tick against the sync line and drives
//! the output line only when its level changes. Ticks are paced by spinning,
//! yielding now and then; when the thread falls more than a period behind it
//! re-bases instead of bursting to catch up.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, info};
use zxrom_core::{
    bus::LineBus,
    error::Error,
    pulse::{PulseGenerator, PulseSequencer, PulseTiming, SyncSource},
};

const SPIN_YIELD_EVERY: u32 = 512;

pub struct ThreadPulseGenerator<B: LineBus + Send + Sync + 'static> {
    bus: Arc<B>,
    stop: Arc<AtomicBool>,
    pulses: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl<B: LineBus + Send + Sync + 'static> ThreadPulseGenerator<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            bus,
            stop: Arc::new(AtomicBool::new(false)),
            pulses: Arc::new(AtomicU64::new(0)),
            join: None,
        }
    }

    /// Pulses emitted since the last start.
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Acquire)
    }
}

fn run_sequencer<B: LineBus>(
    bus: &B,
    timing: PulseTiming,
    source: SyncSource,
    stop: &AtomicBool,
    pulses: &AtomicU64,
) {
    let mut sequencer = PulseSequencer::new(timing, source.edge);
    let mut output = true;
    bus.set_line(source.output, output);

    let mut next_tick = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let level = sequencer.clock(bus.sample().level(source.sync));
        if level != output {
            bus.set_line(source.output, level);
            output = level;
        }
        pulses.store(sequencer.pulses(), Ordering::Release);

        next_tick += timing.tick;
        let now = Instant::now();
        if now > next_tick + timing.period() {
            next_tick = now;
            continue;
        }
        let mut spins: u32 = 0;
        while Instant::now() < next_tick {
            std::hint::spin_loop();
            spins = spins.wrapping_add(1);
            if spins.is_multiple_of(SPIN_YIELD_EVERY) {
                thread::yield_now();
            }
        }
    }
    bus.set_line(source.output, true);
}

impl<B: LineBus + Send + Sync + 'static> PulseGenerator for ThreadPulseGenerator<B> {
    fn start(&mut self, timing: PulseTiming, source: SyncSource) -> Result<(), Error> {
        timing.validate()?;
        self.stop();
        self.stop.store(false, Ordering::Release);
        self.pulses.store(0, Ordering::Release);

        let bus = Arc::clone(&self.bus);
        let stop = Arc::clone(&self.stop);
        let pulses = Arc::clone(&self.pulses);
        let join = thread::Builder::new()
            .name("zxrom-pulse".into())
            .spawn(move || run_sequencer(&*bus, timing, source, &stop, &pulses))?;
        self.join = Some(join);
        info!(
            sync = source.sync,
            output = source.output,
            period_us = timing.period().as_micros() as u64,
            delay_us = timing.delay().as_micros() as u64,
            width_us = timing.width().as_micros() as u64,
            "pulse generator started"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
            debug!(pulses = self.pulses(), "pulse generator stopped");
        }
    }
}

impl<B: LineBus + Send + Sync + 'static> Drop for ThreadPulseGenerator<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
