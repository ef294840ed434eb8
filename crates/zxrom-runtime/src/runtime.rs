mod alarm;
mod control;
mod handle;
mod state;
mod supervisor;
mod types;

pub use handle::{Runtime, RuntimeHandle};
pub use types::{RuntimeError, RuntimeEvent};
