use std::time::Duration;

use zxrom_core::{EngineReport, error::Error};

/// Something the supervisor did, in the order it did it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Reset released; the host CPU is fetching. Follows power-up, every
    /// button switch and every reset pulse.
    HostReleased,
    /// Host held in reset for a button switch.
    SwitchEngaged { from: usize },
    /// The announcement image for `bank` is being served.
    AnnouncementShown { bank: usize },
    BankSwitched { from: usize, to: usize },
    /// Reset pulsed without changing the image.
    ResetPulsed,
    Stopped { report: EngineReport },
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime control channel disconnected")]
    ControlChannelDisconnected,
    #[error("runtime did not respond in time for {op}")]
    ControlTimeout { op: &'static str },
    #[error("bank {bank} out of range ({count} banks)")]
    BankOutOfRange { bank: usize, count: usize },
    #[error("a bank switch is already in progress")]
    SwitchInProgress,
    #[error("failed to spawn {context} thread: {source}")]
    Spawn {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context} thread panicked")]
    Panicked { context: &'static str },
    #[error("host is held in reset")]
    HostHeldInReset,
    #[error("no data driven for address {address:#06x}")]
    BusTimeout { address: u16 },
    #[error(transparent)]
    Core(#[from] Error),
}

pub(crate) const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const EVENT_CAPACITY: usize = 64;
