//! Output relay: blocking reads from the PTY master into an append-only buffer.

use super::error::PtyError;
use super::pty::PtyMaster;
use crate::config::DEFAULT_READ_CHUNK_BYTES;
use crate::log_debug;
use std::io::{self, ErrorKind};
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;

/// Receives relayed chunks and hands back everything accumulated so far.
pub trait OutputSink {
    /// Append `chunk` and return the full contents.
    fn accept(&mut self, chunk: &[u8]) -> &[u8];

    /// Called once the relay reached end-of-stream.
    fn finish(&mut self) {}
}

/// Ordered, append-only output of one session. Sealed once the relay completes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    sealed: bool,
}

impl OutputBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True once no further bytes will ever be appended.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl OutputSink for OutputBuffer {
    fn accept(&mut self, chunk: &[u8]) -> &[u8] {
        if !self.sealed {
            self.bytes.extend_from_slice(chunk);
        }
        &self.bytes
    }

    fn finish(&mut self) {
        self.sealed = true;
    }
}

enum ReadOutcome {
    Data(usize),
    EndOfStream,
}

fn should_retry_read_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// Linux reports a hung-up master (every slave descriptor closed) as `EIO`, not EOF.
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

fn read_chunk(master: &PtyMaster, buffer: &mut [u8]) -> io::Result<ReadOutcome> {
    loop {
        // SAFETY: master is an open descriptor and buffer is writable for its full length.
        let n = unsafe {
            libc::read(
                master.as_raw_fd(),
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        if n > 0 {
            return Ok(ReadOutcome::Data(n as usize));
        }
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        let err = io::Error::last_os_error();
        if is_hangup(&err) {
            return Ok(ReadOutcome::EndOfStream);
        }
        if should_retry_read_error(&err) {
            if err.kind() == ErrorKind::WouldBlock {
                thread::sleep(Duration::from_millis(10));
            }
            continue;
        }
        return Err(err);
    }
}

/// Owns the master end and drains it to end-of-stream.
#[derive(Debug)]
pub struct OutputRelay {
    master: Option<PtyMaster>,
    device_index: u32,
    chunk_bytes: usize,
    bytes_relayed: usize,
}

impl OutputRelay {
    pub fn new(master: PtyMaster) -> Self {
        Self {
            device_index: master.index(),
            master: Some(master),
            chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            bytes_relayed: 0,
        }
    }

    /// Largest single read from the master; clamped to at least one byte.
    #[must_use]
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    #[must_use]
    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    /// True once end-of-stream was seen and the master closed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.master.is_none()
    }

    #[must_use]
    pub fn bytes_relayed(&self) -> usize {
        self.bytes_relayed
    }

    /// Read until end-of-stream, passing each chunk to `sink`; returns the sink's final contents.
    ///
    /// Blocks the calling thread. After completion the master is closed and
    /// further calls return the sink's contents without reading.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::IoFault`] for read errors other than hang-up. The
    /// master stays open so the caller decides whether to retry or drop.
    pub fn drain<'s, S: OutputSink + ?Sized>(
        &mut self,
        sink: &'s mut S,
    ) -> Result<&'s [u8], PtyError> {
        let Some(master) = self.master.as_ref() else {
            return Ok(sink.accept(&[]));
        };
        let mut buffer = vec![0u8; self.chunk_bytes];
        loop {
            match read_chunk(master, &mut buffer) {
                Ok(ReadOutcome::Data(n)) => {
                    let chunk = buffer.get(..n).unwrap_or(&[]);
                    self.bytes_relayed += chunk.len();
                    sink.accept(chunk);
                }
                Ok(ReadOutcome::EndOfStream) => break,
                Err(err) => {
                    log_debug(&format!("pty {} read error: {err}", self.device_index));
                    return Err(PtyError::io_fault("read", Some(self.device_index))(err));
                }
            }
        }
        self.master = None;
        sink.finish();
        tracing::debug!(
            index = self.device_index,
            bytes = self.bytes_relayed,
            "pty relay reached end-of-stream"
        );
        Ok(sink.accept(&[]))
    }
}
