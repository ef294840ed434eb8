pub mod host;
pub mod pulse;
pub mod runtime;

pub use host::SimHost;
pub use pulse::ThreadPulseGenerator;
pub use runtime::{Runtime, RuntimeError, RuntimeEvent, RuntimeHandle};
