//! Doctor-report assembly that surfaces PTY support and config problems before a run.

use crate::config::{AppConfig, NamespaceKind};
use crate::pty_session::{devices_for, lowest_free_index};
use crate::{log_file_path, telemetry::tracing_log_path};
use std::path::Path;
use std::{env, fmt::Display};

const PTMX_PATH: &str = "/dev/ptmx";

/// Structured text report builder used by `--doctor`.
pub struct DoctorReport {
    lines: Vec<String>,
}

impl DoctorReport {
    pub fn new(title: &str) -> Self {
        Self {
            lines: vec![title.to_string()],
        }
    }

    /// Append a section heading preceded by a blank line.
    pub fn section(&mut self, title: &str) {
        self.lines.push(String::new());
        self.lines.push(format!("{title}:"));
    }

    pub fn push_kv(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("  {key}: {value}"));
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Baseline report: build info, config, log locations, and the device namespace.
pub fn base_doctor_report(config: &AppConfig, binary_name: &str) -> DoctorReport {
    let mut report = DoctorReport::new("pty-probe doctor");
    report.push_kv("version", env!("CARGO_PKG_VERSION"));
    report.push_kv("binary", binary_name);
    report.push_kv("os", format!("{}/{}", env::consts::OS, env::consts::ARCH));

    report.section("Config");
    match config.validate() {
        Ok(()) => report.push_kv("validation", "ok"),
        Err(err) => report.push_kv("validation", format!("error: {err}")),
    }
    report.push_kv(
        "logs",
        if config.logging_enabled() {
            "enabled"
        } else {
            "disabled"
        },
    );
    report.push_kv("log_file", log_file_path().display());
    report.push_kv("trace_log", tracing_log_path().display());
    report.push_kv("read_chunk_bytes", config.read_chunk_bytes);
    report.push_kv("term", &config.term);

    report.section("Devices");
    report.push_kv("namespace", config.namespace);
    report.push_kv("ptmx", presence(Path::new(PTMX_PATH)));
    match config.namespace {
        NamespaceKind::Host => {
            report.push_kv(
                "devpts_dir",
                format!(
                    "{} ({})",
                    config.devpts_dir.display(),
                    presence(&config.devpts_dir)
                ),
            );
        }
        NamespaceKind::Virtual => report.push_kv("max_ptys", config.max_ptys),
    }
    match devices_for(config).current_indices() {
        Ok(indices) => {
            let listing: Vec<u32> = indices.iter().copied().collect();
            report.push_kv("open_indices", format!("{listing:?}"));
            report.push_kv("next_index", lowest_free_index(&indices));
        }
        Err(err) => report.push_kv("open_indices", format!("error: {err}")),
    }

    report
}

fn presence(path: &Path) -> &'static str {
    if path.exists() {
        "present"
    } else {
        "missing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn report_renders_sections_in_order() {
        let mut report = DoctorReport::new("title");
        report.push_kv("a", 1);
        report.section("Next");
        report.push_kv("b", "two");
        assert_eq!(report.render(), "title\n  a: 1\n\nNext:\n  b: two");
    }

    #[test]
    fn virtual_namespace_reports_empty_table() {
        let config = AppConfig {
            namespace: NamespaceKind::Virtual,
            max_ptys: 16,
            ..AppConfig::default()
        };
        let text = base_doctor_report(&config, "pty-probe").render();
        assert!(text.starts_with("pty-probe doctor"));
        assert!(text.contains("  validation: ok"));
        assert!(text.contains("  namespace: virtual"));
        assert!(text.contains("  max_ptys: 16"));
        assert!(text.contains("  open_indices: []"));
        assert!(text.contains("  next_index: 0"));
    }

    #[test]
    fn missing_devpts_dir_is_reported_not_fatal() {
        let config = AppConfig {
            devpts_dir: PathBuf::from("/nonexistent/pty-probe-devpts"),
            ..AppConfig::default()
        };
        let text = base_doctor_report(&config, "pty-probe").render();
        assert!(text.contains("/nonexistent/pty-probe-devpts (missing)"));
        assert!(text.contains("  open_indices: error:"));
    }

    #[test]
    fn host_indices_render_as_a_bracketed_listing() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock after epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("pty-probe-doctor-devpts-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create fake devpts");
        for name in ["ptmx", "0", "2"] {
            std::fs::write(dir.join(name), b"").expect("touch entry");
        }
        let config = AppConfig {
            devpts_dir: dir.clone(),
            ..AppConfig::default()
        };
        let text = base_doctor_report(&config, "pty-probe").render();
        let _ = std::fs::remove_dir_all(&dir);
        assert!(text.contains("  open_indices: [0, 2]"), "{text}");
        assert!(text.contains("  next_index: 1"));
    }

    #[test]
    fn invalid_config_is_listed() {
        let config = AppConfig {
            read_chunk_bytes: 0,
            ..AppConfig::default()
        };
        let text = base_doctor_report(&config, "pty-probe").render();
        assert!(text.contains("  validation: error: --read-chunk-bytes"));
    }
}
