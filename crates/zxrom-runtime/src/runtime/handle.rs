use std::{
    sync::{Arc, atomic::Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{info, warn};
use zxrom_core::{
    Board, EngineReport, RomSet, bus::LineBus, config::BoardConfig, pulse::PulseGenerator, switch,
};

use super::{
    control::{ControlMessage, ControlReplySender},
    state::RuntimeState,
    supervisor::Supervisor,
    types::{CONTROL_REPLY_TIMEOUT, EVENT_CAPACITY, RuntimeError, RuntimeEvent},
};

struct RuntimeInner {
    ctrl_tx: Sender<ControlMessage>,
    state: Arc<RuntimeState>,
    board: Arc<Board>,
}

/// A running board: the engine on one thread, the supervisor on another.
///
/// Dropping the runtime stops both and leaves the host held in reset.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    events: Receiver<RuntimeEvent>,
    join: Option<JoinHandle<Result<EngineReport, RuntimeError>>>,
}

#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Holds the host in reset, then builds the tables, preconverts the
    /// images and starts the board. The host stays held when preparation
    /// fails.
    pub fn boot<B>(
        config: BoardConfig,
        images: RomSet,
        bus: Arc<B>,
        pulse: Option<Box<dyn PulseGenerator + Send>>,
    ) -> Result<Self, RuntimeError>
    where
        B: LineBus + Send + Sync + 'static,
    {
        config.lines.validate()?;
        switch::hold_host(&*bus, &config.lines, true);
        let board = Board::new(config, images)?;
        Self::start_internal(board, bus, pulse)
    }

    /// Starts an already prepared board. The host is held in reset from this
    /// call on; use [`Runtime::boot`] to cover table building as well.
    pub fn start<B>(board: Board, bus: Arc<B>) -> Result<Self, RuntimeError>
    where
        B: LineBus + Send + Sync + 'static,
    {
        Self::start_internal(board, bus, None)
    }

    /// Also launches `pulse` when the board variant locks NMI to the frame
    /// interrupt.
    pub fn start_with_pulses<B>(
        board: Board,
        bus: Arc<B>,
        pulse: Box<dyn PulseGenerator + Send>,
    ) -> Result<Self, RuntimeError>
    where
        B: LineBus + Send + Sync + 'static,
    {
        Self::start_internal(board, bus, Some(pulse))
    }

    fn start_internal<B>(
        board: Board,
        bus: Arc<B>,
        mut pulse: Option<Box<dyn PulseGenerator + Send>>,
    ) -> Result<Self, RuntimeError>
    where
        B: LineBus + Send + Sync + 'static,
    {
        let started = Instant::now();
        // Nothing may fetch until every table and image is in place.
        board.hold_host(&*bus, true);

        let board = Arc::new(board);
        let state = Arc::new(RuntimeState::new());

        if let Some(source) = board.config().sync_source() {
            match pulse.as_mut() {
                Some(pulse) => pulse.start(board.config().pulse, source)?,
                None => warn!("variant wants sync pulses but no generator was supplied"),
            }
        }

        let engine = match spawn_engine(&board, &bus, &state) {
            Ok(engine) => engine,
            Err(err) => {
                if let Some(pulse) = pulse.as_mut() {
                    pulse.stop();
                }
                return Err(err);
            }
        };

        let (ctrl_tx, ctrl_rx) = unbounded::<ControlMessage>();
        let (event_tx, events) = bounded::<RuntimeEvent>(EVENT_CAPACITY);
        let join = {
            let board = Arc::clone(&board);
            let bus = Arc::clone(&bus);
            let state = Arc::clone(&state);
            // On spawn failure the engine handle is dropped with the closure;
            // the stop flag below still ends the engine thread.
            thread::Builder::new()
                .name("zxrom-supervisor".into())
                .spawn(move || {
                    Supervisor::new(
                        &board, &*bus, ctrl_rx, event_tx, &state, pulse, engine, started,
                    )
                    .run()
                })
        };
        let join = match join {
            Ok(join) => join,
            Err(source) => {
                state.stop.store(true, Ordering::Release);
                return Err(RuntimeError::Spawn {
                    context: "supervisor",
                    source,
                });
            }
        };

        info!(variant = %board.config().variant, "runtime started");
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                ctrl_tx,
                state,
                board,
            }),
            events,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn events(&self) -> &Receiver<RuntimeEvent> {
        &self.events
    }

    /// Stops both contexts and returns the engine's counters.
    pub fn stop(mut self) -> Result<EngineReport, RuntimeError> {
        self.shutdown()
            .unwrap_or(Err(RuntimeError::ControlChannelDisconnected))
    }

    fn shutdown(&mut self) -> Option<Result<EngineReport, RuntimeError>> {
        let _ = self.inner.ctrl_tx.send(ControlMessage::Stop);
        let join = self.join.take()?;
        Some(
            join.join()
                .unwrap_or(Err(RuntimeError::Panicked {
                    context: "supervisor",
                })),
        )
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn spawn_engine<B>(
    board: &Arc<Board>,
    bus: &Arc<B>,
    state: &Arc<RuntimeState>,
) -> Result<JoinHandle<EngineReport>, RuntimeError>
where
    B: LineBus + Send + Sync + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<(), RuntimeError>>(1);
    let board = Arc::clone(board);
    let bus = Arc::clone(bus);
    let thread_state = Arc::clone(state);
    let join = thread::Builder::new()
        .name("zxrom-engine".into())
        .spawn(move || {
            let mut engine = match board.engine(&*bus) {
                Ok(engine) => engine,
                Err(err) => {
                    let _ = ready_tx.send(Err(err.into()));
                    return EngineReport::default();
                }
            };
            let _ = ready_tx.send(Ok(()));
            engine.run_until(&thread_state.stop)
        })
        .map_err(|source| RuntimeError::Spawn {
            context: "engine",
            source,
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(join),
        Ok(Err(err)) => {
            let _ = join.join();
            Err(err)
        }
        Err(_) => {
            let _ = join.join();
            Err(RuntimeError::Panicked { context: "engine" })
        }
    }
}

impl RuntimeHandle {
    pub fn board(&self) -> &Board {
        &self.inner.board
    }

    pub fn current_bank(&self) -> usize {
        self.inner.board.store().current_bank()
    }

    pub fn bank_name(&self, bank: usize) -> Option<&str> {
        self.inner.board.store().bank_name(bank)
    }

    pub fn host_released(&self) -> bool {
        self.inner.state.host_released.load(Ordering::Acquire)
    }

    /// Bank changes since start, from any source.
    pub fn switch_count(&self) -> u64 {
        self.inner.state.switches.load(Ordering::Acquire)
    }

    /// Engine counters, once the runtime has stopped.
    pub fn engine_report(&self) -> Option<EngineReport> {
        *self.inner.state.report.lock()
    }

    /// Switches to `bank` with a reset pulse. Rejected while a button switch
    /// is in progress or the host is still in power-up reset. Returns once the
    /// host has been released again.
    pub fn select_bank(&self, bank: usize) -> Result<(), RuntimeError> {
        let count = self.inner.board.store().bank_count();
        if bank >= count {
            return Err(RuntimeError::BankOutOfRange { bank, count });
        }
        self.send_with_reply("select_bank", CONTROL_REPLY_TIMEOUT, |reply| {
            ControlMessage::SelectBank(bank, reply)
        })
    }

    /// Holds the host in reset for `commit_reset`, returning after release.
    pub fn pulse_reset(&self) -> Result<(), RuntimeError> {
        self.send_with_reply("pulse_reset", CONTROL_REPLY_TIMEOUT, ControlMessage::PulseReset)
    }

    fn send_with_reply(
        &self,
        op: &'static str,
        timeout: Duration,
        build: impl FnOnce(ControlReplySender) -> ControlMessage,
    ) -> Result<(), RuntimeError> {
        let (reply_tx, reply_rx) = bounded::<Result<(), RuntimeError>>(1);
        self.inner
            .ctrl_tx
            .send(build(reply_tx))
            .map_err(|_| RuntimeError::ControlChannelDisconnected)?;
        match reply_rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(RuntimeError::ControlTimeout { op })
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(RuntimeError::ControlChannelDisconnected)
            }
        }
    }
}
