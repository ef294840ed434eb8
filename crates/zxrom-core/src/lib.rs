use tracing::{info, warn};

use crate::{
    bank::RomBankStore,
    bus::LineBus,
    config::{BoardConfig, Features},
    engine::BusEngine,
    error::Error,
    image::RomImage,
    switch::SwitchController,
    tables::BusTables,
};

pub mod address;
pub mod bank;
pub mod bus;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod image;
pub mod lines;
pub mod mem_block;
pub mod pulse;
pub mod switch;
pub mod tables;

pub use address::LogicalAddress;
pub use config::Variant;
pub use engine::{Cycle, EngineReport};
pub use lines::{LineMap, LineSnapshot};

/// Images handed over by the asset loader, in logical byte order.
#[derive(Debug, Default)]
pub struct RomSet {
    /// Cycled in order; bank 0 is served after reset.
    pub banks: Vec<(String, RomImage)>,
    pub aux: Vec<(String, RomImage)>,
    /// Template for the "switching to ..." image.
    pub announcement: Option<RomImage>,
}

impl RomSet {
    pub fn bank(mut self, name: impl Into<String>, image: RomImage) -> Self {
        self.banks.push((name.into(), image));
        self
    }

    pub fn aux(mut self, name: impl Into<String>, image: RomImage) -> Self {
        self.aux.push((name.into(), image));
        self
    }

    pub fn announcement(mut self, template: RomImage) -> Self {
        self.announcement = Some(template);
        self
    }
}

/// A fully prepared board: validated configuration, lookup tables and the
/// preconverted bank store. Everything here is built before the engine starts
/// and is read-only afterwards, apart from the store's two atomics.
#[derive(Debug)]
pub struct Board {
    config: BoardConfig,
    tables: BusTables,
    store: RomBankStore,
}

impl Board {
    pub fn new(config: BoardConfig, images: RomSet) -> Result<Self, Error> {
        let features = config.features();
        let tables = BusTables::build(&config.lines)?;

        let mut builder = RomBankStore::builder(tables.preconverter());
        for (name, image) in images.banks {
            builder = builder.bank(name, image);
        }
        for (name, image) in images.aux {
            builder = builder.aux(name, image);
        }
        match images.announcement {
            Some(template) if features.contains(Features::ANNOUNCE) => {
                builder = builder.announcement(template, config.label_offset);
            }
            Some(_) => warn!(variant = %config.variant, "announcement image ignored"),
            None if features.contains(Features::ANNOUNCE) => {
                return Err(Error::MissingAnnouncement);
            }
            None => {}
        }
        let store = builder.build()?;

        if features.intersects(Features::BUTTON_SWITCH | Features::INLINE_NMI) {
            config.lines.user_button.ok_or(Error::MissingLine {
                role: "user_button",
            })?;
        }
        if features.contains(Features::INLINE_NMI) {
            config.lines.nmi.ok_or(Error::MissingLine { role: "nmi" })?;
        }
        if features.contains(Features::SYNC_PULSES) {
            config.lines.int_sync.ok_or(Error::MissingLine { role: "int_sync" })?;
            config.lines.nmi.ok_or(Error::MissingLine { role: "nmi" })?;
            config.pulse.validate()?;
        }
        if features.contains(Features::ADDRESS_TRIGGERS) {
            for trigger in &config.triggers {
                if store.slot_of(trigger.target).is_none() {
                    return Err(Error::UnknownImage {
                        name: format!("{:?}", trigger.target),
                    });
                }
            }
        }

        info!(
            variant = %config.variant,
            banks = store.bank_count(),
            "board prepared"
        );
        Ok(Self {
            config,
            tables,
            store,
        })
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn tables(&self) -> &BusTables {
        &self.tables
    }

    pub fn store(&self) -> &RomBankStore {
        &self.store
    }

    /// Engine with this variant's triggers and inline NMI applied.
    pub fn engine<'a, B: LineBus + ?Sized>(&'a self, bus: &'a B) -> Result<BusEngine<'a, B>, Error> {
        let features = self.config.features();
        let mut engine = BusEngine::new(bus, &self.tables, &self.store);
        if features.contains(Features::ADDRESS_TRIGGERS) {
            engine = engine.with_triggers(&self.config.triggers)?;
        }
        if features.contains(Features::INLINE_NMI) {
            engine = engine.with_inline_nmi(self.config.inline_nmi_samples)?;
        }
        Ok(engine)
    }

    /// Button switcher for variants that have one.
    pub fn switch_controller<'a, B: LineBus + ?Sized>(
        &'a self,
        bus: &'a B,
    ) -> Result<Option<SwitchController<'a, B>>, Error> {
        self.config
            .switch_config()
            .map(|switch| SwitchController::new(bus, &self.store, &self.config.lines, switch))
            .transpose()
    }

    /// Drives the reset line. `true` keeps the host CPU from fetching.
    pub fn hold_host<B: LineBus + ?Sized>(&self, bus: &B, held: bool) {
        switch::hold_host(bus, &self.config.lines, held);
    }
}

#[cfg(test)]
mod tests {
    use ctor::ctor;
    use tracing::Level;
    use tracing_subscriber::FmtSubscriber;

    use super::*;
    use crate::bus::SimBus;

    #[ctor]
    fn init_tracing() {
        let subscriber = FmtSubscriber::builder()
            .with_file(true)
            .with_line_number(true)
            .with_max_level(Level::DEBUG)
            .pretty()
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
    }

    fn images() -> RomSet {
        RomSet::default()
            .bank("48K", RomImage::filled(0))
            .bank("Jet Set Willy", RomImage::filled(1))
    }

    #[test]
    fn cycler_needs_an_announcement() {
        let err = Board::new(BoardConfig::for_variant(Variant::Cycler), images()).unwrap_err();
        assert!(matches!(err, Error::MissingAnnouncement));

        let board = Board::new(
            BoardConfig::for_variant(Variant::Cycler),
            images().announcement(RomImage::filled(0xFF)),
        )
        .expect("complete board");
        assert!(board.store().has_announcements());
    }

    #[test]
    fn interface1_needs_its_aux_image() {
        let config = BoardConfig::for_variant(Variant::Interface1);
        assert!(matches!(
            Board::new(config.clone(), images()),
            Err(Error::UnknownImage { .. })
        ));
        let board = Board::new(config, images().aux("if1", RomImage::filled(2))).expect("board");
        let bus = SimBus::idle(&board.config().lines);
        assert!(board.engine(&bus).is_ok());
        assert!(board.switch_controller(&bus).expect("ok").is_none());
    }

    #[test]
    fn sync_pulses_validate_timing() {
        let mut config = BoardConfig::for_variant(Variant::LowerBorder);
        config.pulse.width_ticks = 0;
        assert!(matches!(
            Board::new(config, images()),
            Err(Error::InvalidPulseTiming { .. })
        ));
    }

    #[test]
    fn button_variants_need_a_button_line() {
        let mut config = BoardConfig::for_variant(Variant::CyclerDirect);
        config.lines.user_button = None;
        assert!(matches!(
            Board::new(config, images()),
            Err(Error::MissingLine {
                role: "user_button"
            })
        ));
    }

    #[test]
    fn hold_host_drives_reset_and_led() {
        let board = Board::new(BoardConfig::for_variant(Variant::CyclerDirect), images())
            .expect("board");
        let bus = SimBus::default();
        board.hold_host(&bus, true);
        assert!(bus.output_level(28));
        assert!(bus.output_level(25));
        board.hold_host(&bus, false);
        assert_eq!(bus.outputs(), 0);
        assert!(board.switch_controller(&bus).expect("ok").is_some());
    }
}
