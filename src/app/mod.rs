//! Process-level plumbing shared by the probe binary and the library.

pub(crate) mod logging;
