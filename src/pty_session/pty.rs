//! PTY pair allocation against the host kernel or a per-instance virtual namespace.
//!
//! Both halves of a pair own their descriptor and share one index lease, so the
//! index leaves the namespace exactly when the last half is closed.

use super::error::{is_exhaustion, PtyError};
use super::namespace::{list_devpts, DeviceNamespace, IndexTable};
use crate::config::DEFAULT_DEVPTS_DIR;
use crate::lock_or_recover;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex};

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// Opens PTY pairs inside one sandbox instance.
pub trait PtyAllocator {
    /// Allocate a master/slave pair; its index joins the namespace.
    ///
    /// # Errors
    ///
    /// [`PtyError::ResourceExhausted`] when no slot remains, [`PtyError::IoFault`]
    /// for any other OS failure.
    fn open(&self) -> Result<PtyPair, PtyError>;
}

/// Keeps an index allocated for as long as either half of its pair is open.
#[derive(Debug)]
struct IndexLease {
    index: u32,
    table: Option<Arc<Mutex<IndexTable>>>,
}

impl Drop for IndexLease {
    fn drop(&mut self) {
        // Host indices are released by the kernel when the descriptors close.
        if let Some(table) = self.table.take() {
            lock_or_recover(&table, "index lease release").release(self.index);
            tracing::debug!(index = self.index, "virtual pty index released");
        }
    }
}

/// Controller side of a pair; the relay reads child output from it.
#[derive(Debug)]
pub struct PtyMaster {
    fd: OwnedFd,
    lease: Arc<IndexLease>,
}

/// Terminal side of a pair; the launcher binds it to the child's standard streams.
#[derive(Debug)]
pub struct PtySlave {
    fd: OwnedFd,
    lease: Arc<IndexLease>,
}

impl PtyMaster {
    #[must_use]
    pub fn index(&self) -> u32 {
        self.lease.index
    }
}

impl PtySlave {
    #[must_use]
    pub fn index(&self) -> u32 {
        self.lease.index
    }
}

impl AsFd for PtyMaster {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PtyMaster {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for PtySlave {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PtySlave {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// A freshly opened master/slave pair and the device index it was given.
#[derive(Debug)]
pub struct PtyPair {
    master: PtyMaster,
    slave: PtySlave,
}

impl PtyPair {
    fn new(master: OwnedFd, slave: OwnedFd, lease: IndexLease) -> Self {
        let lease = Arc::new(lease);
        Self {
            master: PtyMaster {
                fd: master,
                lease: Arc::clone(&lease),
            },
            slave: PtySlave { fd: slave, lease },
        }
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.master.index()
    }

    #[must_use]
    pub fn master(&self) -> &PtyMaster {
        &self.master
    }

    #[must_use]
    pub fn slave(&self) -> &PtySlave {
        &self.slave
    }

    /// Hand the halves to their consumers: slave to the launcher, master to the relay.
    #[must_use]
    pub fn into_split(self) -> (PtyMaster, PtySlave) {
        (self.master, self.slave)
    }
}

/// Kernel PTYs, enumerated from a devpts mount.
#[derive(Debug, Clone)]
pub struct HostPtys {
    devpts_dir: PathBuf,
}

impl HostPtys {
    pub fn new(devpts_dir: impl Into<PathBuf>) -> Self {
        Self {
            devpts_dir: devpts_dir.into(),
        }
    }

    #[must_use]
    pub fn devpts_dir(&self) -> &Path {
        &self.devpts_dir
    }
}

impl Default for HostPtys {
    fn default() -> Self {
        Self::new(DEFAULT_DEVPTS_DIR)
    }
}

impl PtyAllocator for HostPtys {
    fn open(&self) -> Result<PtyPair, PtyError> {
        let (master, slave) = open_raw_pair()?;
        let index = kernel_index(&master, &slave)
            .map_err(PtyError::io_fault("query pty index", None))?;
        tracing::debug!(index, "host pty opened");
        Ok(PtyPair::new(
            master,
            slave,
            IndexLease { index, table: None },
        ))
    }
}

impl DeviceNamespace for HostPtys {
    fn current_indices(&self) -> Result<BTreeSet<u32>, PtyError> {
        list_devpts(&self.devpts_dir)
    }
}

/// One sandbox instance with a private, in-memory PTY index table.
///
/// Handles are real kernel PTYs so children still get a working terminal; only
/// the reported index comes from this instance's table. Dropping the instance
/// is its teardown: a new instance always starts empty.
#[derive(Debug, Clone)]
pub struct VirtualPtys {
    table: Arc<Mutex<IndexTable>>,
}

impl VirtualPtys {
    pub fn new(capacity: u32) -> Self {
        Self {
            table: Arc::new(Mutex::new(IndexTable::new(capacity))),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        lock_or_recover(&self.table, "virtual capacity").capacity()
    }
}

impl PtyAllocator for VirtualPtys {
    fn open(&self) -> Result<PtyPair, PtyError> {
        let acquired = lock_or_recover(&self.table, "virtual acquire").acquire();
        let Some(index) = acquired else {
            return Err(PtyError::ResourceExhausted {
                detail: format!("virtual namespace holds {} ptys", self.capacity()),
                source: None,
            });
        };
        // Constructed before the OS call so a failed openpty hands the slot back.
        let lease = IndexLease {
            index,
            table: Some(Arc::clone(&self.table)),
        };
        let (master, slave) = open_raw_pair()?;
        tracing::debug!(index, "virtual pty opened");
        Ok(PtyPair::new(master, slave, lease))
    }
}

impl DeviceNamespace for VirtualPtys {
    fn current_indices(&self) -> Result<BTreeSet<u32>, PtyError> {
        Ok(lock_or_recover(&self.table, "virtual snapshot").snapshot())
    }
}

/// `openpty(3)` with both descriptors close-on-exec.
fn open_raw_pair() -> Result<(OwnedFd, OwnedFd), PtyError> {
    let mut master_fd: RawFd = -1;
    let mut slave_fd: RawFd = -1;
    let mut winsize = libc::winsize {
        ws_row: DEFAULT_ROWS,
        ws_col: DEFAULT_COLS,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    #[allow(clippy::unnecessary_mut_passed)]
    // SAFETY: openpty writes two descriptors into stack locals; winsize is initialized.
    let result = unsafe {
        libc::openpty(
            &mut master_fd,
            &mut slave_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            &mut winsize,
        )
    };
    if result != 0 {
        let err = io::Error::last_os_error();
        if is_exhaustion(&err) {
            return Err(PtyError::ResourceExhausted {
                detail: "openpty".to_string(),
                source: Some(err),
            });
        }
        return Err(PtyError::IoFault {
            device_index: None,
            operation: "openpty",
            source: err,
        });
    }

    // SAFETY: openpty succeeded, so both descriptors are open and owned by nobody else.
    let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master_fd), OwnedFd::from_raw_fd(slave_fd)) };
    set_cloexec(master.as_raw_fd()).map_err(PtyError::io_fault("fcntl(FD_CLOEXEC)", None))?;
    set_cloexec(slave.as_raw_fd()).map_err(PtyError::io_fault("fcntl(FD_CLOEXEC)", None))?;
    Ok((master, slave))
}

/// Mark a descriptor close-on-exec so it does not leak into unrelated children.
pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Index the kernel gave this pair: `TIOCGPTN` where available, else the slave's tty name.
fn kernel_index(master: &OwnedFd, slave: &OwnedFd) -> io::Result<u32> {
    #[cfg(target_os = "linux")]
    {
        let mut index: libc::c_uint = 0;
        // SAFETY: TIOCGPTN writes one unsigned int into `index`.
        if unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCGPTN as _, &mut index) } == 0 {
            return Ok(index);
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = master;

    let name = tty_name(slave)?;
    parse_device_index(&name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("tty name {name:?} carries no device index"),
        )
    })
}

fn tty_name(fd: &OwnedFd) -> io::Result<String> {
    let mut buf = [0 as libc::c_char; 128];
    // SAFETY: buf is writable for its full length; ttyname_r NUL-terminates on success.
    let rc = unsafe { libc::ttyname_r(fd.as_raw_fd(), buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    // SAFETY: ttyname_r succeeded, so buf holds a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

/// Trailing decimal digits of a tty path: `/dev/pts/7` → 7, `/dev/ttys012` → 12.
pub(crate) fn parse_device_index(tty_path: &str) -> Option<u32> {
    let (digits_start, _) = tty_path
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()?;
    tty_path[digits_start..].parse().ok()
}
