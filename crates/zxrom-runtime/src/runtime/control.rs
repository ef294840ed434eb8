use crossbeam_channel::Sender;

use super::types::RuntimeError;

pub(crate) type ControlReplySender = Sender<Result<(), RuntimeError>>;

pub(crate) enum ControlMessage {
    Stop,
    SelectBank(usize, ControlReplySender),
    PulseReset(ControlReplySender),
}
