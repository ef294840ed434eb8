use std::sync::atomic::{AtomicBool, AtomicU64};

use parking_lot::Mutex;
use zxrom_core::EngineReport;

pub(crate) struct RuntimeState {
    /// Read by the engine every few thousand idle polls.
    pub(crate) stop: AtomicBool,
    pub(crate) host_released: AtomicBool,
    pub(crate) switches: AtomicU64,
    pub(crate) report: Mutex<Option<EngineReport>>,
}

impl RuntimeState {
    pub(crate) fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            host_released: AtomicBool::new(false),
            switches: AtomicU64::new(0),
            report: Mutex::new(None),
        }
    }
}
