// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use action::Action;
use async_trait::async_trait;
use outcome::Outcome;

use crate::toolchain::Toolchain;
use crate::{build, runner_args, Classpath, Config, Mode, RUNNER_MAIN};

///
/// Runs actions on the host's Java VM: the compiled jar is the runtime artifact, installation
/// is a no-op, and results stream over the runner's standard output.
///
pub struct HostJvm {
    config: Arc<Config>,
    toolchain: Arc<dyn Toolchain>,
}

impl HostJvm {
    pub fn new(config: Arc<Config>, toolchain: Arc<dyn Toolchain>) -> HostJvm {
        HostJvm { config, toolchain }
    }
}

#[async_trait]
impl Mode for HostJvm {
    async fn prepare(&self) -> Result<(), String> {
        if !self.config.runner_jar.exists() {
            return Err(format!(
                "Runner jar missing: {}",
                self.config.runner_jar.display()
            ));
        }
        tokio::fs::create_dir_all(&self.config.local_tmp)
            .await
            .map_err(|e| {
                format!(
                    "Failed to create {}: {e}",
                    self.config.local_tmp.display()
                )
            })
    }

    async fn build_and_install(&self, action: &Action) -> Option<Outcome> {
        build::build_jar(self.toolchain.as_ref(), &self.config, action)
            .await
            .err()
    }

    fn create_action_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        monitor_port: Option<u16>,
    ) -> Vec<String> {
        let mut classpath = Classpath::of([self.config.runner_jar.clone()]);
        if action.source_file().is_some() {
            if let Some(workdir) = action.user_dir() {
                classpath.add(build::jar_path(workdir, action));
            }
        }
        classpath.append(&self.config.classpath);

        let mut command = vec![self.config.java.clone()];
        command.extend(self.config.java_args.iter().cloned());
        if let Some(port) = self.config.debug_port {
            command.push("-Xdebug".to_owned());
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

    async fn cleanup(&self, action: &Action) -> Result<(), String> {
        let Some(workdir) = action.user_dir() else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(workdir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("Failed to remove {}: {e}", workdir.display())),
        }
    }

    async fn shutdown(&self) -> Result<(), String> {
        if self.config.clean_after {
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

    fn use_socket_monitor(&self) -> bool {
        false
    }
}
