// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::sync::Arc;

use action::Action;
use async_trait::async_trait;
use cache::{HostCache, TargetCache};
use outcome::Outcome;
use target::Target;

mod activity;
mod app_process;
mod build;
mod classpath;
mod device_dalvik;
mod host_dalvik;
mod host_jvm;
mod toolchain;

pub use crate::activity::DeviceActivity;
pub use crate::app_process::AppProcess;
pub use crate::classpath::Classpath;
pub use crate::device_dalvik::DeviceDalvik;
pub use crate::host_dalvik::HostDalvik;
pub use crate::host_jvm::HostJvm;
pub use crate::toolchain::{CompileSpec, ExecToolchain, ToolFailure, Toolchain};

/// Entry point of the in-target runner; it lives in the runner jar.
pub const RUNNER_MAIN: &str = "javelin.target.TestRunner";

/// Runner tag reported for benchmark outcomes; benchmark runs are unbounded and unrecorded.
pub const BENCHMARK_RUNNER_TAG: &str = "caliper";

///
/// Everything a mode needs to know about this run, threaded in at construction. One value per
/// run; no mode state is global.
///
#[derive(Clone, Debug)]
pub struct Config {
    /// The runner jar on the host, deployed to wherever the runner executes.
    pub runner_jar: PathBuf,
    /// The global runner directory on the execution environment.
    pub runner_dir: PathBuf,
    /// Host-side scratch root; per-action working directories live underneath.
    pub local_tmp: PathBuf,
    /// Host-side fingerprint cache root.
    pub cache_dir: PathBuf,
    /// On-device fingerprint cache root, for the device variants.
    pub device_cache_dir: PathBuf,
    pub classpath: Classpath,
    pub build_classpath: Classpath,
    pub source_path: Vec<PathBuf>,
    pub java: String,
    pub dalvikvm: String,
    pub java_args: Vec<String>,
    pub target_args: Vec<String>,
    pub debug_port: Option<u16>,
    pub benchmark: bool,
    pub keep_before: bool,
    pub clean_after: bool,
    pub first_monitor_port: u16,
    pub monitor_port_count: usize,
}

impl Config {
    pub fn new(runner_jar: PathBuf, runner_dir: PathBuf, local_tmp: PathBuf) -> Config {
        let cache_dir = local_tmp.join("cache");
        let device_cache_dir = PathBuf::from("/sdcard/javelin/cache");
        Config {
            runner_jar,
            runner_dir,
            local_tmp,
            cache_dir,
            device_cache_dir,
            classpath: Classpath::new(),
            build_classpath: Classpath::new(),
            source_path: Vec::new(),
            java: "java".to_owned(),
            dalvikvm: "dalvikvm".to_owned(),
            java_args: Vec::new(),
            target_args: Vec::new(),
            debug_port: None,
            benchmark: false,
            keep_before: false,
            clean_after: true,
            first_monitor_port: 8788,
            monitor_port_count: 1,
        }
    }
}

///
/// The per-environment strategy: how to turn an action's sources into a runnable artifact in
/// that environment, how to launch it, and how to clean up afterwards.
///
/// Shared machinery (compiling, jarring, dexing, caching) lives in free functions used by the
/// variants; the trait carries only what genuinely differs per environment.
///
#[async_trait]
pub trait Mode: Send + Sync {
    ///
    /// One-time setup for the run: scratch and runner directories, the deployed runner,
    /// port forwarding. A failure here is fatal to the run.
    ///
    async fn prepare(&self) -> Result<(), String>;

    ///
    /// Compiles and deploys one action. Returns None on success, or a synthetic failure
    /// outcome (`COMPILE_FAILED` or `ERROR`) carrying the tool output.
    ///
    async fn build_and_install(&self, action: &Action) -> Option<Outcome>;

    ///
    /// The command line that executes one action. `skip_past` names the last outcome started by
    /// a previous attempt, so a relaunched runner can resume after a crash; `monitor_port` is
    /// set when the socket monitor is in use.
    ///
    fn create_action_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        monitor_port: Option<u16>,
    ) -> Vec<String>;

    /// Removes per-action scratch, host side and (for remote variants) target side.
    async fn cleanup(&self, action: &Action) -> Result<(), String>;

    /// Releases run-global resources; called on every exit path.
    async fn shutdown(&self) -> Result<(), String>;

    /// Whether the host monitor should connect over a socket rather than read process output.
    fn use_socket_monitor(&self) -> bool;
}

///
/// The selectable execution environments.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Variant {
    HostJvm,
    HostDalvik,
    DeviceDalvik,
    DeviceActivity,
    AppProcess,
}

impl Variant {
    pub fn is_device(self) -> bool {
        matches!(
            self,
            Variant::DeviceDalvik | Variant::DeviceActivity | Variant::AppProcess
        )
    }
}

///
/// Builds the mode for a variant. Device variants additionally need the target they deploy to;
/// handing it in here (rather than having modes construct their own) keeps every device
/// resource owned by one run-scoped value.
///
pub fn create_mode(
    variant: Variant,
    config: Config,
    toolchain: Arc<dyn Toolchain>,
    device: Option<Arc<dyn Target>>,
) -> Result<Arc<dyn Mode>, String> {
    let config = Arc::new(config);
    let host_cache = HostCache::new(config.cache_dir.clone())?;
    match variant {
        Variant::HostJvm => Ok(Arc::new(HostJvm::new(config, toolchain))),
        Variant::HostDalvik => Ok(Arc::new(HostDalvik::new(config, toolchain, host_cache))),
        _ => {
            let device = device
                .ok_or_else(|| format!("{variant:?} requires a device target"))?;
            let device_cache =
                TargetCache::new(device.clone(), config.device_cache_dir.clone());
            match variant {
                Variant::DeviceDalvik => Ok(Arc::new(DeviceDalvik::new(
                    config, toolchain, device, host_cache, device_cache,
                ))),
                Variant::DeviceActivity => Ok(Arc::new(DeviceActivity::new(
                    config, toolchain, device, host_cache, device_cache,
                ))),
                Variant::AppProcess => Ok(Arc::new(AppProcess::new(
                    config, toolchain, device, host_cache, device_cache,
                ))),
                _ => unreachable!(),
            }
        }
    }
}

///
/// The runner's own command-line vocabulary, identical across environments.
///
pub(crate) fn runner_args(
    config: &Config,
    action: &Action,
    skip_past: Option<&str>,
    monitor_port: Option<u16>,
) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(port) = monitor_port {
        args.push("--monitorPort".to_owned());
        args.push(port.to_string());
    }
    if let Some(skip_past) = skip_past {
        args.push("--skipPast".to_owned());
        args.push(skip_past.to_owned());
    }
    if config.benchmark {
        args.push("--benchmark".to_owned());
    }
    args.push(action.name().to_owned());
    args.extend(config.target_args.iter().cloned());
    args
}
