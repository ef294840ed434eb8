use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};
use zxrom_core::{
    RomSet, Variant,
    bus::SimBus,
    config::{BoardConfig, Features},
    image::LABEL_LEN,
    pulse::PulseGenerator,
};
use zxrom_runtime::{Runtime, RuntimeEvent, SimHost, ThreadPulseGenerator};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME: Duration = Duration::from_millis(20);
const INT_WIDTH: Duration = Duration::from_micros(32);

/// A running board with a scripted host attached to its bus.
pub struct Session {
    runtime: Runtime,
    host: SimHost,
}

impl Session {
    pub fn start(variant: Variant, images: RomSet) -> Result<Self> {
        let config = BoardConfig::for_variant(variant);
        let map = config.lines;
        let bus = Arc::new(SimBus::idle(&map));
        let pulse = config.sync_source().map(|_| {
            Box::new(ThreadPulseGenerator::new(Arc::clone(&bus))) as Box<dyn PulseGenerator + Send>
        });
        let runtime =
            Runtime::boot(config, images, Arc::clone(&bus), pulse).context("starting board")?;
        Ok(Self {
            runtime,
            host: SimHost::new(bus, map)?,
        })
    }

    pub fn run(self, presses: u32) -> Result<()> {
        self.wait_for(|e| *e == RuntimeEvent::HostReleased)?;
        self.dump_head("after power-up")?;

        let config = self.runtime.handle().board().config().clone();
        let features = config.features();
        if features.contains(Features::BUTTON_SWITCH) {
            for _ in 0..presses {
                self.press_for_switch(&config)?;
            }
        } else if features.contains(Features::ADDRESS_TRIGGERS) {
            self.walk_triggers(&config)?;
        } else if features.contains(Features::INLINE_NMI) {
            for _ in 0..presses {
                self.press_for_nmi(&config)?;
            }
        } else if features.contains(Features::SYNC_PULSES) {
            self.run_frames(&config, presses)?;
        }

        let report = self.runtime.stop()?;
        info!(
            reads = report.reads,
            writes_ignored = report.writes_ignored,
            triggers = report.triggers_fired,
            nmi = report.nmi_pulses,
            "session finished"
        );
        Ok(())
    }

    fn press_for_switch(&self, config: &BoardConfig) -> Result<()> {
        let button = config.lines.user_button.context("no button line")?;
        self.host.bus().set_input(button, true);
        let engaged = self.wait_for(|e| {
            matches!(
                e,
                RuntimeEvent::AnnouncementShown { .. } | RuntimeEvent::BankSwitched { .. }
            )
        })?;
        self.host.bus().set_input(button, false);
        self.wait_for(|e| *e == RuntimeEvent::HostReleased)?;

        if let RuntimeEvent::AnnouncementShown { .. } = engaged {
            let label = self
                .host
                .read_block(config.label_offset as u16, LABEL_LEN)?;
            info!(
                label = %String::from_utf8_lossy(&label).trim_end(),
                "announcement on screen"
            );
            self.wait_for(|e| matches!(e, RuntimeEvent::BankSwitched { .. }))?;
            self.wait_for(|e| *e == RuntimeEvent::HostReleased)?;
        }
        self.dump_head("after switch")
    }

    fn walk_triggers(&self, config: &BoardConfig) -> Result<()> {
        for trigger in &config.triggers {
            let address = trigger.address.value();
            let value = self.host.read(address)?;
            let next = self.host.read(address.wrapping_add(1))?;
            info!(
                address = format_args!("{address:#06x}"),
                value = format_args!("{value:#04x}"),
                next = format_args!("{next:#04x}"),
                target = ?trigger.target,
                "trigger address read"
            );
        }
        Ok(())
    }

    fn press_for_nmi(&self, config: &BoardConfig) -> Result<()> {
        let button = config.lines.user_button.context("no button line")?;
        let nmi = config.lines.nmi.context("no nmi line")?;
        self.host.bus().set_input(button, true);
        let deadline = Instant::now() + STEP_TIMEOUT;
        while self.host.bus().output_level(nmi) {
            if Instant::now() >= deadline {
                bail!("NMI never asserted");
            }
            thread::sleep(Duration::from_millis(1));
        }
        // The read that completes while NMI is low releases it.
        let value = self.host.read(0x0066)?;
        info!(
            handler = format_args!("{value:#04x}"),
            released = self.host.bus().output_level(nmi),
            "NMI taken"
        );
        self.host.bus().set_input(button, false);
        thread::sleep(config.settle);
        Ok(())
    }

    fn run_frames(&self, config: &BoardConfig, frames: u32) -> Result<()> {
        let sync = config.lines.int_sync.context("no int line")?;
        for _ in 0..frames {
            self.host.bus().set_input(sync, false);
            thread::sleep(INT_WIDTH);
            self.host.bus().set_input(sync, true);
            thread::sleep(FRAME);
        }
        info!(frames, "frame interrupts sent");
        Ok(())
    }

    fn dump_head(&self, when: &str) -> Result<()> {
        let bytes = self.host.read_block(0, 8)?;
        let hex = bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        let handle = self.runtime.handle();
        let bank = handle.current_bank();
        info!(
            bank,
            name = handle.bank_name(bank).unwrap_or("?"),
            head = %hex,
            "{when}"
        );
        Ok(())
    }

    /// Logs events until one matches.
    fn wait_for(&self, wanted: impl Fn(&RuntimeEvent) -> bool) -> Result<RuntimeEvent> {
        let deadline = Instant::now() + STEP_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.runtime.events().recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => bail!("board went quiet"),
                Err(RecvTimeoutError::Disconnected) => bail!("runtime exited"),
            };
            self.log_event(event);
            if wanted(&event) {
                return Ok(event);
            }
        }
    }

    fn log_event(&self, event: RuntimeEvent) {
        let handle = self.runtime.handle();
        let name = |bank| handle.bank_name(bank).unwrap_or("?").to_owned();
        match event {
            RuntimeEvent::HostReleased => info!("host running"),
            RuntimeEvent::SwitchEngaged { from } => info!(from = %name(from), "switch engaged"),
            RuntimeEvent::AnnouncementShown { bank } => {
                info!(next = %name(bank), "announcing")
            }
            RuntimeEvent::BankSwitched { from, to } => {
                info!(from = %name(from), to = %name(to), "bank switched")
            }
            RuntimeEvent::ResetPulsed => info!("reset pulsed"),
            RuntimeEvent::Stopped { .. } => warn!("runtime stopped"),
        }
    }
}
