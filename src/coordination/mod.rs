//! Process-level coordination: cooperative shutdown/reload and PID-file
//! single-instance enforcement.

pub mod pid_file;
pub mod shutdown;

pub use pid_file::{PidFile, PidStatus};
pub use shutdown::{install_signal_handlers, ControlHandle, ControlSignal, LoopControl};
