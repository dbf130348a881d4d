//! pty-probe entrypoint: one PTY session per sandbox instance, with the namespace
//! listing on stderr so a harness can compare runs across instances.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use pty_probe::config::AppConfig;
use pty_probe::doctor::base_doctor_report;
use pty_probe::harness::HarnessDeclaration;
use pty_probe::telemetry::init_tracing;
use pty_probe::verify::{check_run, decode_escapes};
use pty_probe::{devices_for, init_logging, log_debug, run_session, RunReport};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_COMMAND: [&str; 2] = ["echo", "Hello, world!"];

#[derive(Debug, Parser)]
#[command(
    name = "pty-probe",
    version,
    about = "Run a command on a fresh pseudoterminal and report the PTY namespace"
)]
struct ProbeConfig {
    #[command(flatten)]
    app: AppConfig,

    /// Print environment and PTY diagnostics, then exit
    #[arg(long = "doctor", default_value_t = false)]
    doctor: bool,

    /// Discard this process's own stdout for the whole run
    #[arg(long = "silence-stdout", default_value_t = false)]
    silence_stdout: bool,

    /// Child command as one shell-quoted string (ignored when trailing args are given)
    #[arg(long = "command")]
    command: Option<String>,

    /// Exact output the child must produce; accepts \r \n \t \\ escapes
    #[arg(long = "expect", default_value = r"Hello, world!\r\n")]
    expect: String,

    /// Write the run report as JSON to this path
    #[arg(long = "report-json")]
    report_json: Option<PathBuf>,

    /// Harness declaration JSON, e.g. {"runs": 2, "expect": {"matching_stderr": true}}
    #[arg(long = "declaration", env = "PTY_PROBE_DECLARATION")]
    declaration: Option<String>,

    /// Print run details to stderr unless the declaration compares stderr across runs
    #[arg(long = "verbose", default_value_t = false)]
    verbose: bool,

    /// Child argv
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    argv: Vec<String>,
}

impl ProbeConfig {
    fn child_argv(&self) -> Result<Vec<String>> {
        if !self.argv.is_empty() {
            return Ok(self.argv.clone());
        }
        let Some(command) = self.command.as_deref() else {
            return Ok(DEFAULT_COMMAND.iter().map(|part| (*part).to_string()).collect());
        };
        let argv = shell_words::split(command)
            .with_context(|| format!("cannot parse --command {command:?}"))?;
        if argv.is_empty() {
            bail!("--command must name a program");
        }
        Ok(argv)
    }

    fn declaration(&self) -> Result<Option<HarnessDeclaration>> {
        self.declaration
            .as_deref()
            .map(HarnessDeclaration::from_json)
            .transpose()
            .map_err(|err| anyhow!(err))
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = report.to_json().context("serialize run report")?;
    fs::write(path, json).with_context(|| format!("write run report to {}", path.display()))
}

fn main() -> Result<()> {
    let config = ProbeConfig::parse();
    if config.doctor {
        println!("{}", base_doctor_report(&config.app, "pty-probe").render());
        return Ok(());
    }
    config.app.validate().map_err(|err| anyhow!(err))?;
    let declaration = config.declaration()?;
    let argv = config.child_argv()?;
    let expected = decode_escapes(&config.expect);

    init_logging(&config.app);
    init_tracing(&config.app);

    let _stdout_gag = if config.silence_stdout {
        Some(gag::Gag::stdout().context("silence stdout")?)
    } else {
        None
    };

    let devices = devices_for(&config.app);
    let report = run_session(&*devices, &argv, &config.app)
        .with_context(|| format!("pty session for {argv:?} failed"))?;
    log_debug(&format!(
        "pty-probe run: index={} namespace={} exit={:?}",
        report.device_index,
        report.namespace_listing(),
        report.exit_code
    ));

    eprintln!("{}", report.namespace_listing());
    let compared_across_runs = declaration.is_some_and(|decl| decl.compares_runs());
    if config.verbose && !compared_across_runs {
        eprintln!(
            "pty {} (lowest free before: {}), {} bytes, exit {:?}",
            report.device_index,
            report.lowest_free_before,
            report.output.len(),
            report.exit_code
        );
    }

    if let Some(path) = config.report_json.as_deref() {
        write_report(path, &report)?;
    }
    check_run(&report, &expected)?;
    Ok(())
}
