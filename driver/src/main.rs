// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The `javelin` binary: command-line surface over the driver.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use driver::{discover, Console, Driver, RunConfig};
use expectation::ExpectationStore;
use log::error;
use mode::{Classpath, Config as ModeConfig, ExecToolchain, Variant};
use outcome_store::OutcomeStore;
use target::{AdbTarget, SshTarget, Target};

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
enum ModeOption {
    /// The host's Java VM.
    Jvm,
    /// A Dalvik VM on the host.
    HostDalvik,
    /// A device's Dalvik VM, over adb (or ssh, with --ssh).
    Device,
    /// An installed Android application on a device.
    Activity,
    /// app_process on a device.
    AppProcess,
}

impl ModeOption {
    fn variant(self) -> Variant {
        match self {
            ModeOption::Jvm => Variant::HostJvm,
            ModeOption::HostDalvik => Variant::HostDalvik,
            ModeOption::Device => Variant::DeviceDalvik,
            ModeOption::Activity => Variant::DeviceActivity,
            ModeOption::AppProcess => Variant::AppProcess,
        }
    }
}

#[derive(Parser)]
#[command(name = "javelin", about = "Compiles tests, deploys them to an execution target, \
runs them under the in-target runner and judges the streamed results against a declarative \
expectations database.")]
struct Opt {
    /// Execution environment to deploy to and run on.
    #[arg(long, value_enum, default_value_t = ModeOption::Jvm)]
    mode: ModeOption,

    /// Seconds a test point may run before it is timed out; 0 disables timeouts.
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// First port the host monitor connects to; parallel runners use consecutive ports.
    #[arg(long, default_value_t = 8788)]
    first_monitor_port: u16,

    /// Seconds to keep retrying the monitor connection.
    #[arg(long, default_value_t = 30)]
    monitor_timeout: u64,

    /// Expectation files, merged in order.
    #[arg(long = "expectations")]
    expectations: Vec<PathBuf>,

    /// Runtime classpath entries for the target VM.
    #[arg(long)]
    classpath: Vec<PathBuf>,

    /// Compile-time-only classpath entries.
    #[arg(long)]
    build_classpath: Vec<PathBuf>,

    /// Source roots for compilation.
    #[arg(long)]
    sourcepath: Vec<PathBuf>,

    /// Extra arguments for the target VM.
    #[arg(long = "vm-arg")]
    vm_args: Vec<String>,

    /// The jar containing the in-target runner.
    #[arg(long, default_value = "javelin-runner.jar")]
    runner_jar: PathBuf,

    /// Directory the runner is deployed to; defaults per environment.
    #[arg(long)]
    runner_dir: Option<PathBuf>,

    /// Host-side scratch directory.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Directory outcome history is recorded under.
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Directory tag snapshots live under.
    #[arg(long)]
    tag_dir: Option<PathBuf>,

    /// Record this run as a named tag snapshot.
    #[arg(long)]
    tag: Option<String>,

    /// Diff this run against a previously recorded tag.
    #[arg(long)]
    compare_to_tag: Option<String>,

    /// JDWP port to listen on; disables timeouts so the debugger can think.
    #[arg(long)]
    debug: Option<u16>,

    /// Run benchmarks: unbounded timeouts, and no history recording.
    #[arg(long)]
    benchmark: bool,

    /// Stream output as it arrives (one action at a time) instead of multiplexing runners.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    stream: bool,

    /// Print every line of test output, not just failures.
    #[arg(long)]
    verbose: bool,

    #[arg(long)]
    no_color: bool,

    /// Keep stale per-action scratch from earlier runs instead of clearing it.
    #[arg(long)]
    keep_before: bool,

    /// Keep per-action scratch and the runner directory when the run ends.
    #[arg(long)]
    keep_after: bool,

    /// Device serial, when several are attached.
    #[arg(long)]
    device_serial: Option<String>,

    /// Use an ssh-reachable machine (host or host:port) as the device target.
    #[arg(long)]
    ssh: Option<String>,

    /// Qualified class names (optionally with #method), source files, or directories to scan.
    #[arg(required = true)]
    actions: Vec<String>,

    /// Arguments passed through to the runner after the action name.
    #[arg(last = true)]
    target_args: Vec<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opt = Opt::parse();
    if opt.no_color {
        colored::control::set_override(false);
    }

    let code = match run(opt).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            1
        }
    };
    exit(code);
}

async fn run(opt: Opt) -> Result<i32, String> {
    let variant = opt.mode.variant();
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let base_dir = home
        .map(|home| home.join(".javelin"))
        .unwrap_or_else(|| std::env::temp_dir().join("javelin"));

    let local_tmp = opt.scratch_dir.unwrap_or_else(|| {
        std::env::temp_dir()
            .join("javelin")
            .join(std::process::id().to_string())
    });
    let results_dir = opt.results_dir.unwrap_or_else(|| base_dir.join("results"));
    let tag_dir = opt.tag_dir.unwrap_or_else(|| base_dir.clone());
    let runner_dir = opt.runner_dir.unwrap_or_else(|| {
        if variant.is_device() {
            PathBuf::from("/sdcard/javelin/run")
        } else {
            local_tmp.join("run")
        }
    });

    let runner_count = if opt.stream || variant == Variant::DeviceActivity {
        1
    } else {
        num_cpus::get()
    };

    let mut mode_config = ModeConfig::new(opt.runner_jar, runner_dir, local_tmp.clone());
    mode_config.classpath = Classpath::of(opt.classpath);
    mode_config.build_classpath = Classpath::of(opt.build_classpath);
    mode_config.source_path = opt.sourcepath;
    mode_config.java_args = opt.vm_args;
    mode_config.target_args = opt.target_args;
    mode_config.debug_port = opt.debug;
    mode_config.benchmark = opt.benchmark;
    mode_config.keep_before = opt.keep_before;
    mode_config.clean_after = !opt.keep_after;
    mode_config.first_monitor_port = opt.first_monitor_port;
    mode_config.monitor_port_count = runner_count;

    let device: Option<Arc<dyn Target>> = if variant.is_device() {
        match &opt.ssh {
            Some(host) => Some(Arc::new(SshTarget::new(host)?)),
            None => Some(Arc::new(AdbTarget::new(opt.device_serial.clone()))),
        }
    } else {
        None
    };

    let mode = mode::create_mode(
        variant,
        mode_config,
        Arc::new(ExecToolchain::default()),
        device,
    )?;

    let expectations = Arc::new(ExpectationStore::parse(&opt.expectations)?);
    let store = Arc::new(OutcomeStore::new(
        results_dir,
        Some(tag_dir),
        opt.tag.clone(),
        opt.compare_to_tag.clone(),
        expectations.clone(),
    ));
    let console = Arc::new(Console::new(opt.stream, opt.verbose));

    let config = RunConfig {
        variant,
        action_timeout: Duration::from_secs(opt.timeout),
        monitor_timeout: Duration::from_secs(opt.monitor_timeout),
        first_monitor_port: opt.first_monitor_port,
        stream: opt.stream,
        benchmark: opt.benchmark,
        debug: opt.debug.is_some(),
        keep_after: opt.keep_after,
        local_tmp,
    };

    let driver = Driver::new(config, mode, expectations, store, console);
    let discovered = discover(&opt.actions);
    Ok(driver.run(discovered).await)
}
