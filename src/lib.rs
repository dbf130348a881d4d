//! Shared pty-probe library exports so the probe binary and harness embedders agree on behavior.

mod app;
pub mod config;
pub mod doctor;
pub mod harness;
mod lock;
mod process_signal;
pub mod pty_session;
pub mod telemetry;
pub mod verify;

pub use app::logging::{init_logging, log_debug, log_file_path};
#[cfg(test)]
pub(crate) use app::logging::set_logging_for_tests;
pub(crate) use lock::lock_or_recover;
pub use pty_session::{
    devices_for, lowest_free_index, run_session, ChildSession, DeviceNamespace, HostPtys,
    Launcher, OutputBuffer, OutputRelay, OutputSink, PtyAllocator, PtyDevices, PtyError,
    PtyMaster, PtyPair, PtySession, PtySlave, RunReport, SessionState, VirtualPtys,
};
