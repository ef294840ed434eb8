use std::sync::Arc;

use crate::lines::{LineId, LineSnapshot, line_mask};

pub mod sim;

pub use sim::SimBus;

/// GPIO access shared by the bus engine and the supervisor.
///
/// Every method takes `&self`: both contexts hold the same bus the way both
/// cores of the microcontroller see the same GPIO registers. Implementations
/// must make `sample` a single atomic read of all 32 lines.
pub trait LineBus {
    fn sample(&self) -> LineSnapshot;

    /// Sets the lines in `mask` to the matching bits of `bits`, leaving every
    /// other output untouched.
    fn drive(&self, mask: u32, bits: u32);

    fn set_line(&self, line: LineId, high: bool) {
        let mask = line_mask(line);
        self.drive(mask, if high { mask } else { 0 });
    }
}

impl<T: LineBus + ?Sized> LineBus for &T {
    #[inline]
    fn sample(&self) -> LineSnapshot {
        (**self).sample()
    }

    #[inline]
    fn drive(&self, mask: u32, bits: u32) {
        (**self).drive(mask, bits)
    }

    fn set_line(&self, line: LineId, high: bool) {
        (**self).set_line(line, high)
    }
}

impl<T: LineBus + ?Sized> LineBus for Arc<T> {
    #[inline]
    fn sample(&self) -> LineSnapshot {
        (**self).sample()
    }

    #[inline]
    fn drive(&self, mask: u32, bits: u32) {
        (**self).drive(mask, bits)
    }

    fn set_line(&self, line: LineId, high: bool) {
        (**self).set_line(line, high)
    }
}
