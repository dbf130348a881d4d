//! Pseudoterminal-backed process sessions and the device-namespace view a harness
//! uses to check that PTY allocation was reset between sandbox instances.

mod error;
mod io;
mod launcher;
mod namespace;
mod pty;
mod session;


pub use error::PtyError;
pub use io::{OutputBuffer, OutputRelay, OutputSink};
pub use launcher::{spawn, ChildSession, Launcher};
pub use namespace::{lowest_free_index, DeviceNamespace};
pub use pty::{HostPtys, PtyAllocator, PtyMaster, PtyPair, PtySlave, VirtualPtys};
pub use session::{run_session, PtySession, RunReport, SessionState};

use crate::config::{AppConfig, NamespaceKind};

/// Allocator plus namespace view for one sandbox instance.
pub trait PtyDevices: PtyAllocator + DeviceNamespace {}

impl<T: PtyAllocator + DeviceNamespace + ?Sized> PtyDevices for T {}

/// Build the devices `config` selects. Each call yields a fresh virtual instance.
#[must_use]
pub fn devices_for(config: &AppConfig) -> Box<dyn PtyDevices> {
    match config.namespace {
        NamespaceKind::Host => Box::new(HostPtys::new(config.devpts_dir.clone())),
        NamespaceKind::Virtual => Box::new(VirtualPtys::new(config.max_ptys)),
    }
}
