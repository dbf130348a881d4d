//! Shared CLI configuration for namespace selection, relay sizing, and logging.

use clap::{Args, ValueEnum};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_DEVPTS_DIR: &str = "/dev/pts";
pub const DEFAULT_TERM: &str = "xterm-256color";
pub const DEFAULT_READ_CHUNK_BYTES: usize = 1024;
pub const MAX_READ_CHUNK_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_PTYS: u32 = 4096;

/// Which device namespace backs allocation and enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum NamespaceKind {
    /// Real kernel PTYs, enumerated from the devpts directory.
    #[default]
    Host,
    /// Fresh in-memory index table per process.
    Virtual,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NamespaceKind::Host => "host",
            NamespaceKind::Virtual => "virtual",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Args, Clone)]
pub struct AppConfig {
    /// Enable the debug log file and JSON trace
    #[arg(long = "logs", default_value_t = false)]
    pub logs: bool,

    /// Disable all logging, even when --logs or --log-timings is set
    #[arg(long = "no-logs", default_value_t = false)]
    pub no_logs: bool,

    /// Log how long each session phase took
    #[arg(long = "log-timings", default_value_t = false)]
    pub log_timings: bool,

    /// Device namespace used for allocation and enumeration
    #[arg(
        long = "namespace",
        env = "PTY_PROBE_NAMESPACE",
        value_enum,
        default_value_t = NamespaceKind::Host
    )]
    pub namespace: NamespaceKind,

    /// devpts directory listed by the host namespace
    #[arg(long = "devpts-dir", env = "PTY_PROBE_DEVPTS", default_value = DEFAULT_DEVPTS_DIR)]
    pub devpts_dir: PathBuf,

    /// Slot count of the virtual namespace
    #[arg(long = "max-ptys", default_value_t = DEFAULT_MAX_PTYS)]
    pub max_ptys: u32,

    /// Upper bound for a single read from the PTY master
    #[arg(long = "read-chunk-bytes", default_value_t = DEFAULT_READ_CHUNK_BYTES)]
    pub read_chunk_bytes: usize,

    /// TERM value exported to the child
    #[arg(long = "term", default_value = DEFAULT_TERM)]
    pub term: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logs: false,
            no_logs: false,
            log_timings: false,
            namespace: NamespaceKind::Host,
            devpts_dir: PathBuf::from(DEFAULT_DEVPTS_DIR),
            max_ptys: DEFAULT_MAX_PTYS,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            term: DEFAULT_TERM.to_string(),
        }
    }
}

impl AppConfig {
    #[inline]
    pub fn logging_enabled(&self) -> bool {
        (self.logs || self.log_timings) && !self.no_logs
    }

    /// Reject values the session layer cannot honor.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.read_chunk_bytes == 0 || self.read_chunk_bytes > MAX_READ_CHUNK_BYTES {
            return Err(format!(
                "--read-chunk-bytes must be between 1 and {MAX_READ_CHUNK_BYTES}, got {}",
                self.read_chunk_bytes
            ));
        }
        if self.max_ptys == 0 {
            return Err("--max-ptys must be at least 1".to_string());
        }
        if self.devpts_dir.as_os_str().is_empty() {
            return Err("--devpts-dir must not be empty".to_string());
        }
        if self.term.contains('\0') {
            return Err("--term must not contain NUL bytes".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        app: AppConfig,
    }

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["pty-probe"];
        argv.extend_from_slice(args);
        Harness::parse_from(argv).app
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = parse(&[]);
        assert_eq!(cfg.devpts_dir, PathBuf::from("/dev/pts"));
        assert_eq!(cfg.read_chunk_bytes, 1024);
        assert_eq!(cfg.max_ptys, 4096);
        assert_eq!(cfg.term, "xterm-256color");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn namespace_flag_selects_virtual() {
        let cfg = parse(&["--namespace", "virtual"]);
        assert_eq!(cfg.namespace, NamespaceKind::Virtual);
        assert_eq!(cfg.namespace.to_string(), "virtual");
    }

    #[test]
    fn logging_truth_table() {
        let mut cfg = AppConfig::default();
        assert!(!cfg.logging_enabled());
        cfg.log_timings = true;
        assert!(cfg.logging_enabled());
        cfg.logs = true;
        cfg.no_logs = true;
        assert!(!cfg.logging_enabled());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = AppConfig {
            read_chunk_bytes: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().unwrap_err().contains("--read-chunk-bytes"));

        cfg.read_chunk_bytes = MAX_READ_CHUNK_BYTES + 1;
        assert!(cfg.validate().is_err());

        cfg.read_chunk_bytes = 1;
        cfg.max_ptys = 0;
        assert!(cfg.validate().unwrap_err().contains("--max-ptys"));

        cfg.max_ptys = 1;
        cfg.devpts_dir = PathBuf::new();
        assert!(cfg.validate().unwrap_err().contains("--devpts-dir"));
    }
}
