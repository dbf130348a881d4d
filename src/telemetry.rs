//! JSON trace output for session events, written to a local file when logging is on.

use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

const TRACE_LOG_ENV: &str = "PTY_PROBE_TRACE_LOG";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn tracing_log_path() -> PathBuf {
    env::var(TRACE_LOG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("pty_probe_trace.jsonl"))
}

fn init_tracing_once(config: &AppConfig, once: &OnceLock<()>) {
    if !config.logging_enabled() {
        return;
    }

    let _ = once.get_or_init(|| {
        let path = tracing_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(err) => {
                crate::log_debug(&format!(
                    "trace log {} unavailable: {err}",
                    path.display()
                ));
                return;
            }
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Install the global JSON subscriber once per process.
pub fn init_tracing(config: &AppConfig) {
    init_tracing_once(config, &TRACING_INIT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn unique_trace_path(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        env::temp_dir().join(format!("pty-probe-trace-{suffix}-{nanos}.jsonl"))
    }

    #[test]
    fn tracing_log_path_prefers_env_override() {
        let _guard = env_lock().lock().expect("env lock");
        let path = unique_trace_path("env");
        env::set_var(TRACE_LOG_ENV, &path);
        assert_eq!(tracing_log_path(), path);
        env::remove_var(TRACE_LOG_ENV);
        assert_eq!(
            tracing_log_path(),
            env::temp_dir().join("pty_probe_trace.jsonl")
        );
    }

    #[test]
    fn disabled_config_never_creates_trace_file() {
        let _guard = env_lock().lock().expect("env lock");
        let path = unique_trace_path("disabled");
        env::set_var(TRACE_LOG_ENV, &path);

        let once = OnceLock::new();
        let cfg = AppConfig {
            logs: true,
            no_logs: true,
            ..AppConfig::default()
        };
        init_tracing_once(&cfg, &once);
        assert!(once.get().is_none());
        assert!(!path.exists());

        env::remove_var(TRACE_LOG_ENV);
        let _ = fs::remove_file(path);
    }
}
