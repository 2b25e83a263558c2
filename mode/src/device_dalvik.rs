// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action::Action;
use async_trait::async_trait;
use cache::{CacheKey, HostCache, TargetCache};
use outcome::{Outcome, RunResult};
use target::Target;

use crate::toolchain::Toolchain;
use crate::{build, runner_args, Classpath, Config, Mode, RUNNER_MAIN};

const DEVICE_READY_TIMEOUT: Duration = Duration::from_secs(120);

///
/// Runs actions on a device's Dalvik VM over adb: dex jars are pushed through the on-device
/// fingerprint cache so an unchanged artifact never crosses the wire twice, and results come
/// back over a forwarded monitor socket.
///
pub struct DeviceDalvik {
    config: Arc<Config>,
    toolchain: Arc<dyn Toolchain>,
    device: Arc<dyn Target>,
    dex_cache: HostCache,
    push_cache: TargetCache,
}

impl DeviceDalvik {
    pub fn new(
        config: Arc<Config>,
        toolchain: Arc<dyn Toolchain>,
        device: Arc<dyn Target>,
        dex_cache: HostCache,
        push_cache: TargetCache,
    ) -> DeviceDalvik {
        DeviceDalvik {
            config,
            toolchain,
            device,
            dex_cache,
            push_cache,
        }
    }

    pub(crate) fn dex_cache(&self) -> &HostCache {
        &self.dex_cache
    }

    fn deployed_runner_jar(&self) -> PathBuf {
        self.config.runner_dir.join("runner.jar")
    }

    fn deployed_jar(&self, action: &Action) -> PathBuf {
        self.config
            .runner_dir
            .join(format!("{}.jar", action.file_name()))
    }

    fn device_scratch(&self, action: &Action) -> PathBuf {
        self.config.runner_dir.join("tmp").join(action.file_name())
    }

    ///
    /// Shared by the device variants: wait for the device filesystem, create the runner
    /// directories, deploy the dexed runner, and forward the monitor ports.
    ///
    pub(crate) async fn prepare_device(&self) -> Result<(), String> {
        if !self.config.runner_jar.exists() {
            return Err(format!(
                "Runner jar missing: {}",
                self.config.runner_jar.display()
            ));
        }
        tokio::fs::create_dir_all(&self.config.local_tmp)
            .await
            .map_err(|e| format!("Failed to create {}: {e}", self.config.local_tmp.display()))?;

        self.device
            .await_ready(
                &build::probe_path(&self.config.runner_dir),
                DEVICE_READY_TIMEOUT,
            )
            .await?;
        self.device.mkdirs(&self.config.runner_dir).await?;
        self.device
            .mkdirs(&self.config.runner_dir.join("tmp"))
            .await?;
        self.push_cache.prepare().await?;

        // Dex the runner on the host, then deploy it through the push cache.
        let runner_dex = self.config.local_tmp.join("runner.dx.jar");
        build::dex_jar(
            self.toolchain.as_ref(),
            &self.dex_cache,
            "runner",
            &self.config.runner_jar,
            &runner_dex,
        )
        .await
        .map_err(|outcome| outcome.combined_output())?;
        self.push(&runner_dex, &self.deployed_runner_jar()).await?;

        for offset in 0..self.config.monitor_port_count {
            self.device
                .forward_port(self.config.first_monitor_port + offset as u16)
                .await?;
        }
        Ok(())
    }

    /// Deploys a host file to the device, via the on-device cache keyed by content.
    pub(crate) async fn push(&self, local: &PathBuf, deployed: &PathBuf) -> Result<(), String> {
        let key = CacheKey::compute(build::PUSHED_NAMESPACE, local)?;
        if self.push_cache.lookup(&key, deployed).await? {
            return Ok(());
        }
        self.push_cache.publish_from_local(&key, local).await?;
        if !self.push_cache.lookup(&key, deployed).await? {
            return Err(format!("Published {key} was not retrievable"));
        }
        Ok(())
    }

    pub(crate) async fn build_and_push_jar(&self, action: &Action) -> Result<(), Outcome> {
        let Some(jar) = build::build_jar(self.toolchain.as_ref(), &self.config, action).await?
        else {
            return Ok(());
        };
        let workdir = build::workdir(action)?;
        let dex = build::dex_jar_path(&workdir, action);
        build::dex_jar(
            self.toolchain.as_ref(),
            &self.dex_cache,
            action.name(),
            &jar,
            &dex,
        )
        .await?;

        let infra = |e: String| Outcome::from_text(action.name(), RunResult::Error, &e);
        self.push(&dex, &self.deployed_jar(action)).await.map_err(infra)?;
        self.device
            .mkdirs(&self.device_scratch(action))
            .await
            .map_err(infra)?;
        if let Some(resources) = action.resources_dir() {
            self.device
                .push(resources, &self.device_scratch(action))
                .await
                .map_err(infra)?;
        }
        Ok(())
    }

    pub(crate) async fn cleanup_scratch(&self, action: &Action) -> Result<(), String> {
        if let Some(workdir) = action.user_dir() {
            if let Err(e) = tokio::fs::remove_dir_all(workdir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Failed to remove {}: {e}", workdir.display()));
                }
            }
        }
        self.device.rm(&self.device_scratch(action)).await?;
        self.device.rm(&self.deployed_jar(action)).await
    }

    pub(crate) async fn shutdown_device(&self) -> Result<(), String> {
        if self.config.clean_after {
            self.device.rm(&self.config.runner_dir).await?;
            if let Err(e) = tokio::fs::remove_dir_all(&self.config.local_tmp).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!(
                        "Failed to remove {}: {e}",
                        self.config.local_tmp.display()
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn dalvikvm_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        monitor_port: Option<u16>,
    ) -> Vec<String> {
        let mut classpath = Classpath::of([self.deployed_runner_jar()]);
        if action.source_file().is_some() {
            classpath.add(self.deployed_jar(action));
        }
        classpath.append(&self.config.classpath.rebased_under(&self.config.runner_dir));

        let mut command = self.device.process_prefix(&self.device_scratch(action));
        command.push(format!(
            "ANDROID_DATA={}",
            self.config.runner_dir.join("android-data").display()
        ));
        command.push(self.config.dalvikvm.clone());
        command.extend(self.config.java_args.iter().cloned());
        if let Some(port) = self.config.debug_port {
            command.push(format!(
                "-Xrunjdwp:transport=dt_socket,address={port},server=y,suspend=y"
            ));
        }
        command.push("-classpath".to_owned());
        command.push(classpath.to_string());
        command.push(RUNNER_MAIN.to_owned());
        command.extend(runner_args(&self.config, action, skip_past, monitor_port));
        command
    }
}

#[async_trait]
impl Mode for DeviceDalvik {
    async fn prepare(&self) -> Result<(), String> {
        self.prepare_device().await?;
        self.device
            .mkdirs(&self.config.runner_dir.join("android-data"))
            .await
    }

    async fn build_and_install(&self, action: &Action) -> Option<Outcome> {
        self.build_and_push_jar(action).await.err()
    }

    fn create_action_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        monitor_port: Option<u16>,
    ) -> Vec<String> {
        self.dalvikvm_command(action, skip_past, monitor_port)
    }

    async fn cleanup(&self, action: &Action) -> Result<(), String> {
        self.cleanup_scratch(action).await
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.shutdown_device().await
    }

    fn use_socket_monitor(&self) -> bool {
        true
    }
}
