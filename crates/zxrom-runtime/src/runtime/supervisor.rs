use std::{
    sync::atomic::Ordering,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};
use zxrom_core::{
    Board, EngineReport,
    bus::LineBus,
    pulse::PulseGenerator,
    switch::{SwitchController, SwitchOutcome, SwitchState, change_under_reset},
};

use super::{
    alarm::{AlarmAction, AlarmQueue},
    control::{ControlMessage, ControlReplySender},
    state::RuntimeState,
    types::{RuntimeError, RuntimeEvent},
};

/// Context B: startup release, button switching, deferred actions and the
/// control channel. Owns the engine thread and stops it on exit.
pub(crate) struct Supervisor<'a, B: LineBus + ?Sized> {
    board: &'a Board,
    bus: &'a B,
    switch: Option<SwitchController<'a, B>>,
    alarms: AlarmQueue,
    /// Answered once the current reset pulse ends.
    pulse_reply: Option<ControlReplySender>,
    ctrl_rx: Receiver<ControlMessage>,
    event_tx: Sender<RuntimeEvent>,
    state: &'a RuntimeState,
    pulse: Option<Box<dyn PulseGenerator + Send>>,
    engine: Option<JoinHandle<EngineReport>>,
    started: Instant,
}

impl<'a, B: LineBus + ?Sized> Supervisor<'a, B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        board: &'a Board,
        bus: &'a B,
        ctrl_rx: Receiver<ControlMessage>,
        event_tx: Sender<RuntimeEvent>,
        state: &'a RuntimeState,
        pulse: Option<Box<dyn PulseGenerator + Send>>,
        engine: JoinHandle<EngineReport>,
        started: Instant,
    ) -> Self {
        Self {
            board,
            bus,
            switch: None,
            alarms: AlarmQueue::new(),
            pulse_reply: None,
            ctrl_rx,
            event_tx,
            state,
            pulse,
            engine: Some(engine),
            started,
        }
    }

    pub(crate) fn run(mut self) -> Result<EngineReport, RuntimeError> {
        match self.board.switch_controller(self.bus) {
            Ok(switch) => self.switch = switch,
            Err(err) => {
                self.shutdown()?;
                return Err(err.into());
            }
        }

        let board = self.board;
        let config = board.config();
        self.alarms
            .schedule(self.now(), config.startup_reset, AlarmAction::ReleaseHost);
        let poll_interval = config.poll_interval;

        loop {
            while let Ok(msg) = self.ctrl_rx.try_recv() {
                if self.handle_control(msg) {
                    return self.shutdown();
                }
            }

            let now = self.now();
            self.poll_switch(now);
            while let Some(action) = self.alarms.pop_due(now) {
                self.fire(action);
            }

            let wait = self
                .alarms
                .time_to_next(self.now())
                .map_or(poll_interval, |next| next.min(poll_interval));
            match self.ctrl_rx.recv_timeout(wait) {
                Ok(msg) => {
                    if self.handle_control(msg) {
                        return self.shutdown();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return self.shutdown(),
            }
        }
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn poll_switch(&mut self, now: Duration) {
        if !self.state.host_released.load(Ordering::Acquire)
            || self.alarms.is_pending(AlarmAction::EndResetPulse)
        {
            return;
        }
        let Some(outcome) = self.switch.as_mut().and_then(|s| s.poll(now)) else {
            return;
        };
        match outcome {
            SwitchOutcome::Engaged {
                from,
                to,
                announced,
            } => {
                self.emit(RuntimeEvent::SwitchEngaged { from });
                if announced {
                    self.emit(RuntimeEvent::AnnouncementShown { bank: to });
                } else {
                    self.state.switches.fetch_add(1, Ordering::AcqRel);
                    self.emit(RuntimeEvent::BankSwitched { from, to });
                }
            }
            SwitchOutcome::Released { commit_after } => {
                self.emit(RuntimeEvent::HostReleased);
                if let Some(delay) = commit_after
                    && !self.alarms.schedule(now, delay, AlarmAction::CommitSwitch)
                {
                    warn!("alarm queue full, bank switch not committed");
                }
            }
        }
    }

    fn fire(&mut self, action: AlarmAction) {
        debug!(?action, "alarm fired");
        match action {
            AlarmAction::ReleaseHost => {
                self.board.hold_host(self.bus, false);
                self.state.host_released.store(true, Ordering::Release);
                info!(
                    bank = self.board.store().current_bank(),
                    "host released from power-up reset"
                );
                self.emit(RuntimeEvent::HostReleased);
            }
            AlarmAction::CommitSwitch => {
                if let Some(switch) = self.switch.as_mut() {
                    let (from, to) = switch.commit();
                    self.state.switches.fetch_add(1, Ordering::AcqRel);
                    self.emit(RuntimeEvent::BankSwitched { from, to });
                    self.begin_reset_pulse(None);
                }
            }
            AlarmAction::EndResetPulse => self.end_reset_pulse(),
        }
    }

    /// Host is already in reset; schedules its release after `commit_reset`.
    fn begin_reset_pulse(&mut self, reply: Option<ControlReplySender>) {
        self.pulse_reply = reply;
        let hold = self.board.config().commit_reset;
        if !self
            .alarms
            .schedule(self.now(), hold, AlarmAction::EndResetPulse)
        {
            warn!("alarm queue full, ending reset pulse early");
            self.end_reset_pulse();
        }
    }

    fn end_reset_pulse(&mut self) {
        match self.switch.as_mut() {
            Some(switch) if switch.state() == SwitchState::Announcing => switch.finish_commit(),
            _ => self.board.hold_host(self.bus, false),
        }
        self.emit(RuntimeEvent::HostReleased);
        if let Some(reply) = self.pulse_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn switch_busy(&self) -> bool {
        let fsm_busy = self
            .switch
            .as_ref()
            .is_some_and(|s| matches!(s.state(), SwitchState::Switching | SwitchState::Announcing));
        !self.state.host_released.load(Ordering::Acquire)
            || fsm_busy
            || self.alarms.is_pending(AlarmAction::CommitSwitch)
            || self.alarms.is_pending(AlarmAction::EndResetPulse)
    }

    /// Returns `true` when the supervisor should exit.
    fn handle_control(&mut self, msg: ControlMessage) -> bool {
        match msg {
            ControlMessage::Stop => return true,
            ControlMessage::SelectBank(bank, reply) => match self.select_bank(bank) {
                Ok(()) => self.begin_reset_pulse(Some(reply)),
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            ControlMessage::PulseReset(reply) => {
                if self.switch_busy() {
                    let _ = reply.send(Err(RuntimeError::SwitchInProgress));
                } else {
                    self.board.hold_host(self.bus, true);
                    self.emit(RuntimeEvent::ResetPulsed);
                    self.begin_reset_pulse(Some(reply));
                }
            }
        }
        false
    }

    fn select_bank(&mut self, bank: usize) -> Result<(), RuntimeError> {
        let board = self.board;
        let store = board.store();
        let count = store.bank_count();
        if bank >= count {
            return Err(RuntimeError::BankOutOfRange { bank, count });
        }
        if self.switch_busy() {
            return Err(RuntimeError::SwitchInProgress);
        }
        let from = change_under_reset(self.bus, &board.config().lines, || {
            let from = store.current_bank();
            store.select_bank(bank);
            from
        });
        info!(from, to = bank, "bank selected over control channel");
        self.state.switches.fetch_add(1, Ordering::AcqRel);
        self.emit(RuntimeEvent::BankSwitched { from, to: bank });
        Ok(())
    }

    fn emit(&self, event: RuntimeEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "event queue full, dropping"),
        }
    }

    /// Stops the engine and pulse generator, then parks the host in reset:
    /// with nothing answering reads it would only execute garbage.
    fn shutdown(&mut self) -> Result<EngineReport, RuntimeError> {
        self.state.stop.store(true, Ordering::Release);
        if let Some(pulse) = self.pulse.as_mut() {
            pulse.stop();
        }
        let joined = self.engine.take().map(JoinHandle::join);
        self.board.hold_host(self.bus, true);
        let report = match joined {
            Some(Ok(report)) => report,
            Some(Err(_)) => return Err(RuntimeError::Panicked { context: "engine" }),
            None => EngineReport::default(),
        };
        *self.state.report.lock() = Some(report);
        info!(reads = report.reads, "runtime stopped");
        self.emit(RuntimeEvent::Stopped { report });
        Ok(report)
    }
}
