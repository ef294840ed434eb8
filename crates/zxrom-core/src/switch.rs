//! User-button bank switching.
//!
//! A [`Debouncer`] qualifies the raw button level; the [`SwitchFsm`] turns a
//! qualified press into a fixed sequence of bus actions; the
//! [`SwitchController`] applies those actions to the reset line and the bank
//! store. None of this runs on the engine context.

use std::time::Duration;

use tracing::{debug, info};

use crate::{
    bank::RomBankStore,
    bus::LineBus,
    error::Error,
    lines::{LineMap, line_mask},
};

/// How long a raw level must persist before it counts as a press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualification {
    /// Consecutive asserted samples, for debouncing inside a polling loop.
    Samples(u32),
    /// Time since the first asserted sample.
    Elapsed(Duration),
}

impl Default for Qualification {
    fn default() -> Self {
        Self::Elapsed(Duration::from_millis(50))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    #[default]
    Released,
    Pressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    Pressed,
    Released,
}

/// Emits one [`ButtonEdge::Pressed`] per qualified press and one
/// [`ButtonEdge::Released`] when the level drops again.
#[derive(Debug, Clone)]
pub struct Debouncer {
    qualification: Qualification,
    state: ButtonState,
    samples: u32,
    since: Option<Duration>,
}

impl Debouncer {
    pub fn new(qualification: Qualification) -> Self {
        Self {
            qualification,
            state: ButtonState::Released,
            samples: 0,
            since: None,
        }
    }

    pub fn state(&self) -> ButtonState {
        self.state
    }

    /// A press is being qualified but has not been accepted yet.
    pub fn is_counting(&self) -> bool {
        self.state == ButtonState::Released && (self.samples > 0 || self.since.is_some())
    }

    /// Feeds one raw sample. `now` is only consulted for
    /// [`Qualification::Elapsed`].
    pub fn sample(&mut self, now: Duration, asserted: bool) -> Option<ButtonEdge> {
        match (self.state, asserted) {
            (ButtonState::Released, true) => {
                let qualified = match self.qualification {
                    Qualification::Samples(threshold) => {
                        self.samples = self.samples.saturating_add(1);
                        self.samples >= threshold
                    }
                    Qualification::Elapsed(min) => {
                        let since = *self.since.get_or_insert(now);
                        now.saturating_sub(since) >= min
                    }
                };
                if qualified {
                    self.state = ButtonState::Pressed;
                    self.clear_run();
                    Some(ButtonEdge::Pressed)
                } else {
                    None
                }
            }
            (ButtonState::Released, false) => {
                self.clear_run();
                None
            }
            (ButtonState::Pressed, true) => None,
            (ButtonState::Pressed, false) => {
                self.state = ButtonState::Released;
                Some(ButtonEdge::Released)
            }
        }
    }

    fn clear_run(&mut self) {
        self.samples = 0;
        self.since = None;
    }
}

/// What a qualified press does to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    /// Advance straight to the next bank while the host is held.
    Immediate,
    /// Show the announcement image for the next bank first, then switch to it
    /// after `display`.
    Announce { display: Duration },
}

/// Externally visible phase of the switch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Debouncing,
    Switching,
    Announcing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Debouncing,
    /// Host in reset, waiting for the button to be let go.
    Holding,
    /// Button released, host still in reset until `until`.
    Settling { until: Duration },
    /// Host running the announcement image, commit pending.
    Announcing,
}

/// Bus-level action requested by [`SwitchFsm::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    /// Hold the host in reset and move the image pointer.
    Engage,
    /// Let the host run again. With `commit_after`, the real switch follows
    /// after that delay.
    Disengage { commit_after: Option<Duration> },
}

#[derive(Debug, Clone)]
pub struct SwitchFsm {
    debouncer: Debouncer,
    mode: SwitchMode,
    settle: Duration,
    phase: Phase,
}

impl SwitchFsm {
    pub fn new(qualification: Qualification, mode: SwitchMode, settle: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(qualification),
            mode,
            settle,
            phase: Phase::Idle,
        }
    }

    pub fn mode(&self) -> SwitchMode {
        self.mode
    }

    pub fn state(&self) -> SwitchState {
        match self.phase {
            Phase::Idle => SwitchState::Idle,
            Phase::Debouncing => SwitchState::Debouncing,
            Phase::Holding | Phase::Settling { .. } => SwitchState::Switching,
            Phase::Announcing => SwitchState::Announcing,
        }
    }

    /// Advances on one raw button sample taken at `now`.
    pub fn step(&mut self, now: Duration, pressed: bool) -> Option<SwitchAction> {
        match self.phase {
            Phase::Idle | Phase::Debouncing => {
                if let Some(ButtonEdge::Pressed) = self.debouncer.sample(now, pressed) {
                    self.phase = Phase::Holding;
                    return Some(SwitchAction::Engage);
                }
                self.phase = if self.debouncer.is_counting() {
                    Phase::Debouncing
                } else {
                    Phase::Idle
                };
                None
            }
            Phase::Holding => {
                if !pressed {
                    self.debouncer.sample(now, false);
                    self.phase = Phase::Settling {
                        until: now + self.settle,
                    };
                }
                None
            }
            Phase::Settling { until } if now >= until => match self.mode {
                SwitchMode::Immediate => {
                    self.phase = Phase::Idle;
                    Some(SwitchAction::Disengage { commit_after: None })
                }
                SwitchMode::Announce { display } => {
                    self.phase = Phase::Announcing;
                    Some(SwitchAction::Disengage {
                        commit_after: Some(display),
                    })
                }
            },
            Phase::Settling { .. } | Phase::Announcing => None,
        }
    }

    /// Deferred commit finished; presses are accepted again.
    pub fn commit_complete(&mut self) {
        if self.phase == Phase::Announcing {
            self.phase = Phase::Idle;
        }
    }
}

/// Timings and behaviour of the button switcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    pub mode: SwitchMode,
    pub debounce: Qualification,
    /// Reset hold after the button is released.
    pub settle: Duration,
}

/// Result of one applied [`SwitchAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Host held in reset. `to` is the bank now served, or the bank being
    /// announced when `announced` is set.
    Engaged { from: usize, to: usize, announced: bool },
    /// Host released.
    Released { commit_after: Option<Duration> },
}

/// Drives the reset line and bank store from a [`SwitchFsm`].
#[derive(Debug)]
pub struct SwitchController<'a, B: LineBus + ?Sized> {
    bus: &'a B,
    store: &'a RomBankStore,
    fsm: SwitchFsm,
    lines: LineMap,
    button_mask: u32,
}

impl<'a, B: LineBus + ?Sized> SwitchController<'a, B> {
    pub fn new(
        bus: &'a B,
        store: &'a RomBankStore,
        map: &LineMap,
        config: SwitchConfig,
    ) -> Result<Self, Error> {
        let button = map.user_button.ok_or(Error::MissingLine {
            role: "user_button",
        })?;
        if matches!(config.mode, SwitchMode::Announce { .. }) && !store.has_announcements() {
            return Err(Error::MissingAnnouncement);
        }
        Ok(Self {
            bus,
            store,
            fsm: SwitchFsm::new(config.debounce, config.mode, config.settle),
            lines: *map,
            button_mask: line_mask(button),
        })
    }

    pub fn state(&self) -> SwitchState {
        self.fsm.state()
    }

    /// Samples the button and applies whatever the state machine asks for.
    pub fn poll(&mut self, now: Duration) -> Option<SwitchOutcome> {
        let pressed = self.bus.sample().is_high(self.button_mask);
        let action = self.fsm.step(now, pressed)?;
        Some(self.apply(action))
    }

    fn apply(&mut self, action: SwitchAction) -> SwitchOutcome {
        match action {
            SwitchAction::Engage => {
                self.hold_host(true);
                let from = self.store.current_bank();
                match self.fsm.mode() {
                    SwitchMode::Immediate => {
                        let to = self.store.advance();
                        info!(from, to, "switched bank");
                        SwitchOutcome::Engaged {
                            from,
                            to,
                            announced: false,
                        }
                    }
                    SwitchMode::Announce { .. } => {
                        let to = self.store.next_bank();
                        self.store.show_announcement(to);
                        debug!(from, to, "announcing next bank");
                        SwitchOutcome::Engaged {
                            from,
                            to,
                            announced: true,
                        }
                    }
                }
            }
            SwitchAction::Disengage { commit_after } => {
                self.hold_host(false);
                SwitchOutcome::Released { commit_after }
            }
        }
    }

    /// Second half of an announced switch: puts the host in reset and moves
    /// to the announced bank. Returns `(from, to)`. The host stays held until
    /// [`Self::finish_commit`].
    pub fn commit(&mut self) -> (usize, usize) {
        let store = self.store;
        let (from, to) = change_under_reset(self.bus, &self.lines, || {
            (store.current_bank(), store.advance())
        });
        info!(from, to, "switched bank");
        (from, to)
    }

    /// Ends the commit reset pulse; presses are accepted again.
    pub fn finish_commit(&mut self) {
        self.hold_host(false);
        self.fsm.commit_complete();
    }

    fn hold_host(&self, held: bool) {
        hold_host(self.bus, &self.lines, held);
    }
}

/// Drives reset and the status LED together. `true` stops the host CPU.
pub fn hold_host<B: LineBus + ?Sized>(bus: &B, lines: &LineMap, held: bool) {
    bus.set_line(lines.status_led, held);
    bus.set_line(lines.reset, held);
}

/// Puts the host in reset, then runs `change`.
///
/// Reset is left asserted: the caller releases it with [`hold_host`] once the
/// pulse has lasted long enough. The engine can never be mid-cycle while the
/// image pointer moves.
pub fn change_under_reset<B, R>(bus: &B, lines: &LineMap, change: impl FnOnce() -> R) -> R
where
    B: LineBus + ?Sized,
{
    hold_host(bus, lines, true);
    change()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::SimBus, data::DataPreconverter, image::RomImage};

    const MS: Duration = Duration::from_millis(1);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn bounce_shorter_than_threshold_is_ignored() {
        let mut debouncer = Debouncer::new(Qualification::Elapsed(ms(50)));
        for t in 0..49 {
            assert_eq!(debouncer.sample(ms(t), t % 7 != 6), None);
        }
        assert_eq!(debouncer.state(), ButtonState::Released);
    }

    #[test]
    fn held_press_emits_one_edge() {
        let mut debouncer = Debouncer::new(Qualification::Elapsed(ms(50)));
        let edges: Vec<_> = (0..200)
            .filter_map(|t| debouncer.sample(ms(t), true))
            .collect();
        assert_eq!(edges, vec![ButtonEdge::Pressed]);
        assert_eq!(debouncer.sample(ms(200), false), Some(ButtonEdge::Released));
    }

    #[test]
    fn sample_count_qualification() {
        let mut debouncer = Debouncer::new(Qualification::Samples(1000));
        for _ in 0..999 {
            assert_eq!(debouncer.sample(Duration::ZERO, true), None);
        }
        assert!(debouncer.is_counting());
        assert_eq!(
            debouncer.sample(Duration::ZERO, true),
            Some(ButtonEdge::Pressed)
        );
        // A single low sample restarts the count.
        debouncer.sample(Duration::ZERO, false);
        for _ in 0..500 {
            debouncer.sample(Duration::ZERO, true);
        }
        debouncer.sample(Duration::ZERO, false);
        assert!(!debouncer.is_counting());
    }

    #[test]
    fn fsm_immediate_sequence() {
        let mut fsm = SwitchFsm::new(Qualification::Elapsed(ms(50)), SwitchMode::Immediate, ms(600));
        assert_eq!(fsm.step(ms(0), true), None);
        assert_eq!(fsm.state(), SwitchState::Debouncing);
        assert_eq!(fsm.step(ms(50), true), Some(SwitchAction::Engage));
        assert_eq!(fsm.state(), SwitchState::Switching);
        assert_eq!(fsm.step(ms(2000), true), None);
        assert_eq!(fsm.step(ms(2001), false), None);
        assert_eq!(fsm.step(ms(2600), false), None);
        assert_eq!(
            fsm.step(ms(2601), false),
            Some(SwitchAction::Disengage { commit_after: None })
        );
        assert_eq!(fsm.state(), SwitchState::Idle);
    }

    #[test]
    fn fsm_ignores_presses_while_announcing() {
        let mode = SwitchMode::Announce { display: ms(1200) };
        let mut fsm = SwitchFsm::new(Qualification::Elapsed(ms(50)), mode, ms(600));
        fsm.step(ms(0), true);
        assert_eq!(fsm.step(ms(60), true), Some(SwitchAction::Engage));
        fsm.step(ms(100), false);
        assert_eq!(
            fsm.step(ms(700), false),
            Some(SwitchAction::Disengage {
                commit_after: Some(ms(1200))
            })
        );
        assert_eq!(fsm.state(), SwitchState::Announcing);
        for t in 700..900 {
            assert_eq!(fsm.step(ms(t), true), None);
        }
        fsm.commit_complete();
        assert_eq!(fsm.state(), SwitchState::Idle);
    }

    fn store(conv: &DataPreconverter, announce: bool) -> RomBankStore {
        let mut builder = RomBankStore::builder(conv)
            .bank("48K", RomImage::filled(0x01))
            .bank("Manic Miner", RomImage::filled(0x02));
        if announce {
            builder = builder.announcement(RomImage::filled(0xFF), 0);
        }
        builder.build().expect("store")
    }

    fn config(mode: SwitchMode) -> SwitchConfig {
        SwitchConfig {
            mode,
            debounce: Qualification::Elapsed(ms(50)),
            settle: ms(600),
        }
    }

    #[test]
    fn controller_holds_reset_around_immediate_switch() {
        let map = LineMap::ZX_PICO;
        let conv = DataPreconverter::new(&map).expect("valid wiring");
        let store = store(&conv, false);
        let bus = SimBus::idle(&map);
        let mut ctl =
            SwitchController::new(&bus, &store, &map, config(SwitchMode::Immediate)).expect("ok");

        bus.set_input(27, true);
        assert_eq!(ctl.poll(ms(0)), None);
        assert_eq!(
            ctl.poll(ms(50)),
            Some(SwitchOutcome::Engaged {
                from: 0,
                to: 1,
                announced: false
            })
        );
        assert!(bus.output_level(map.reset));
        assert_eq!(store.current_bank(), 1);

        bus.set_input(27, false);
        assert_eq!(ctl.poll(ms(100)), None);
        assert!(bus.output_level(map.reset));
        assert_eq!(
            ctl.poll(ms(100) + 600 * MS),
            Some(SwitchOutcome::Released { commit_after: None })
        );
        assert!(!bus.output_level(map.reset));
        assert!(!bus.output_level(map.status_led));
    }

    #[test]
    fn controller_announces_then_commits() {
        let map = LineMap::ZX_PICO;
        let conv = DataPreconverter::new(&map).expect("valid wiring");
        let store = store(&conv, true);
        let bus = SimBus::idle(&map);
        let mode = SwitchMode::Announce { display: ms(1200) };
        let mut ctl = SwitchController::new(&bus, &store, &map, config(mode)).expect("ok");

        bus.set_input(27, true);
        ctl.poll(ms(0));
        assert_eq!(
            ctl.poll(ms(50)),
            Some(SwitchOutcome::Engaged {
                from: 0,
                to: 1,
                announced: true
            })
        );
        // Still on bank 0, but serving the announcement image.
        assert_eq!(store.current_bank(), 0);
        assert_ne!(store.active_slot(), store.slot_of(crate::bank::ImageSelector::Bank(0)).unwrap());

        bus.set_input(27, false);
        ctl.poll(ms(60));
        assert_eq!(
            ctl.poll(ms(660)),
            Some(SwitchOutcome::Released {
                commit_after: Some(ms(1200))
            })
        );
        assert_eq!(ctl.state(), SwitchState::Announcing);

        assert_eq!(ctl.commit(), (0, 1));
        assert_eq!(store.current_bank(), 1);
        assert!(bus.output_level(map.reset));
        assert_eq!(ctl.state(), SwitchState::Announcing);
        assert_eq!(ctl.poll(ms(2000)), None);

        ctl.finish_commit();
        assert!(!bus.output_level(map.reset));
        assert_eq!(ctl.state(), SwitchState::Idle);
    }

    #[test]
    fn controller_requires_button_and_announcement() {
        let conv = DataPreconverter::new(&LineMap::ZX_PICO).expect("valid wiring");
        let store = store(&conv, false);
        let bus = SimBus::default();
        let no_button = LineMap::ZX_PICO_LOWER_BORDER;
        assert!(matches!(
            SwitchController::new(&bus, &store, &no_button, config(SwitchMode::Immediate)),
            Err(Error::MissingLine { role: "user_button" })
        ));
        let mode = SwitchMode::Announce { display: ms(1) };
        assert!(matches!(
            SwitchController::new(&bus, &store, &LineMap::ZX_PICO, config(mode)),
            Err(Error::MissingAnnouncement)
        ));
    }

    #[test]
    fn host_is_held_while_the_pointer_moves() {
        let map = LineMap::ZX_PICO;
        let conv = DataPreconverter::new(&map).expect("valid wiring");
        let store = store(&conv, false);
        let bus = SimBus::idle(&map);
        let seen = change_under_reset(&bus, &map, || {
            store.select_bank(3);
            (bus.output_level(map.reset), store.current_bank())
        });
        assert_eq!(seen, (true, 1));
        assert!(bus.output_level(map.reset));
        assert!(bus.output_level(map.status_led));
    }
}
