// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;
use std::sync::Arc;

use action::Action;
use async_trait::async_trait;
use cache::HostCache;
use outcome::Outcome;

use crate::toolchain::Toolchain;
use crate::{build, runner_args, Classpath, Config, Mode, RUNNER_MAIN};

///
/// Runs actions on a Dalvik VM installed on the host: jars are translated to dex jars (through
/// the fingerprint cache) but nothing leaves the machine.
///
pub struct HostDalvik {
    config: Arc<Config>,
    toolchain: Arc<dyn Toolchain>,
    dex_cache: HostCache,
}

impl HostDalvik {
    pub fn new(
        config: Arc<Config>,
        toolchain: Arc<dyn Toolchain>,
        dex_cache: HostCache,
    ) -> HostDalvik {
        HostDalvik {
            config,
            toolchain,
            dex_cache,
        }
    }

    fn runner_dex_jar(&self) -> PathBuf {
        self.config.runner_dir.join("runner.dx.jar")
    }

    fn android_data(&self) -> PathBuf {
        self.config.runner_dir.join("android-data")
    }
}

#[async_trait]
impl Mode for HostDalvik {
    async fn prepare(&self) -> Result<(), String> {
        if !self.config.runner_jar.exists() {
            return Err(format!(
                "Runner jar missing: {}",
                self.config.runner_jar.display()
            ));
        }
        for dir in [
            &self.config.local_tmp,
            &self.config.runner_dir,
            &self.android_data(),
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
        }
        build::dex_jar(
            self.toolchain.as_ref(),
            &self.dex_cache,
            "runner",
            &self.config.runner_jar,
            &self.runner_dex_jar(),
        )
        .await
        .map_err(|outcome| outcome.combined_output())
    }

    async fn build_and_install(&self, action: &Action) -> Option<Outcome> {
        let result = async {
            let Some(jar) = build::build_jar(self.toolchain.as_ref(), &self.config, action).await?
            else {
                return Ok(());
            };
            let workdir = build::workdir(action)?;
            build::dex_jar(
                self.toolchain.as_ref(),
                &self.dex_cache,
                action.name(),
                &jar,
                &build::dex_jar_path(&workdir, action),
            )
            .await
        }
        .await;
        result.err()
    }

    fn create_action_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        monitor_port: Option<u16>,
    ) -> Vec<String> {
        let mut classpath = Classpath::of([self.runner_dex_jar()]);
        if action.source_file().is_some() {
            if let Some(workdir) = action.user_dir() {
                classpath.add(build::dex_jar_path(workdir, action));
            }
        }
        classpath.append(&self.config.classpath);

        // Dalvik refuses to start without a writable ANDROID_DATA; `env` carries it without
        // needing a shell in between.
        let mut command = vec![
            "env".to_owned(),
            format!("ANDROID_DATA={}", self.android_data().display()),
            self.config.dalvikvm.clone(),
        ];
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
            for dir in [&self.config.runner_dir, &self.config.local_tmp] {
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(format!("Failed to remove {}: {e}", dir.display()));
                    }
                }
            }
        }
        Ok(())
    }

    fn use_socket_monitor(&self) -> bool {
        false
    }
}
