// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use action::Action;
use async_trait::async_trait;
use cache::{HostCache, TargetCache};
use outcome::Outcome;
use target::Target;

use crate::device_dalvik::DeviceDalvik;
use crate::toolchain::Toolchain;
use crate::{runner_args, Classpath, Config, Mode, RUNNER_MAIN};

///
/// Runs actions on a device through `app_process`, the zygote-backed launcher: the runtime the
/// platform's own applications see, without packaging an APK. Deployment is identical to the
/// device Dalvik variant; only the launch differs.
///
pub struct AppProcess {
    config: Arc<Config>,
    device: Arc<dyn Target>,
    inner: DeviceDalvik,
}

impl AppProcess {
    pub fn new(
        config: Arc<Config>,
        toolchain: Arc<dyn Toolchain>,
        device: Arc<dyn Target>,
        dex_cache: HostCache,
        push_cache: TargetCache,
    ) -> AppProcess {
        let inner = DeviceDalvik::new(
            config.clone(),
            toolchain,
            device.clone(),
            dex_cache,
            push_cache,
        );
        AppProcess {
            config,
            device,
            inner,
        }
    }
}

#[async_trait]
impl Mode for AppProcess {
    async fn prepare(&self) -> Result<(), String> {
        self.inner.prepare_device().await
    }

    async fn build_and_install(&self, action: &Action) -> Option<Outcome> {
        self.inner.build_and_push_jar(action).await.err()
    }

    fn create_action_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        monitor_port: Option<u16>,
    ) -> Vec<String> {
        let mut classpath =
            Classpath::of([self.config.runner_dir.join("runner.jar")]);
        if action.source_file().is_some() {
            classpath.add(
                self.config
                    .runner_dir
                    .join(format!("{}.jar", action.file_name())),
            );
        }
        classpath.append(&self.config.classpath.rebased_under(&self.config.runner_dir));

        let scratch = self.config.runner_dir.join("tmp").join(action.file_name());
        let mut command = self.device.process_prefix(&scratch);
        command.push(format!("CLASSPATH={classpath}"));
        command.extend([
            "app_process".to_owned(),
            "/system/bin".to_owned(),
            RUNNER_MAIN.to_owned(),
        ]);
        command.extend(runner_args(&self.config, action, skip_past, monitor_port));
        command
    }

    async fn cleanup(&self, action: &Action) -> Result<(), String> {
        self.inner.cleanup_scratch(action).await
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.inner.shutdown_device().await
    }

    fn use_socket_monitor(&self) -> bool {
        true
    }
}
