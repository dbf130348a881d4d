//! Device namespace views: which PTY indices one sandbox instance currently has allocated.

use super::error::PtyError;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Read-only view of the PTY indices allocated in the current sandbox instance.
pub trait DeviceNamespace {
    /// Snapshot of allocated indices, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::IoFault`] when the backing device table cannot be read.
    fn current_indices(&self) -> Result<BTreeSet<u32>, PtyError>;
}

/// Smallest non-negative index absent from `allocated`.
#[must_use]
pub fn lowest_free_index(allocated: &BTreeSet<u32>) -> u32 {
    let mut candidate = 0;
    for &index in allocated {
        if index != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

/// Enumerate a devpts mount. Only numeric entries are devices; `ptmx` and friends are skipped.
pub(crate) fn list_devpts(dir: &Path) -> Result<BTreeSet<u32>, PtyError> {
    let entries = fs::read_dir(dir).map_err(PtyError::io_fault("list devpts", None))?;
    let mut indices = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(PtyError::io_fault("list devpts", None))?;
        if let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        {
            indices.insert(index);
        }
    }
    Ok(indices)
}

/// Index bookkeeping for one in-memory sandbox instance.
#[derive(Debug)]
pub(crate) struct IndexTable {
    allocated: BTreeSet<u32>,
    capacity: u32,
}

impl IndexTable {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            allocated: BTreeSet::new(),
            capacity,
        }
    }

    /// Claim the lowest free slot, or `None` once `capacity` slots are taken.
    pub(crate) fn acquire(&mut self) -> Option<u32> {
        let index = lowest_free_index(&self.allocated);
        if index >= self.capacity {
            return None;
        }
        self.allocated.insert(index);
        Some(index)
    }

    pub(crate) fn release(&mut self, index: u32) -> bool {
        self.allocated.remove(&index)
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    pub(crate) fn snapshot(&self) -> BTreeSet<u32> {
        self.allocated.clone()
    }
}
