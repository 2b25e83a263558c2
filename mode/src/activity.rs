// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;
use std::sync::Arc;

use action::Action;
use async_trait::async_trait;
use cache::{HostCache, TargetCache};
use outcome::{Outcome, RunResult};
use target::Target;

use crate::device_dalvik::DeviceDalvik;
use crate::toolchain::Toolchain;
use crate::{build, Config, Mode};

///
/// Runs actions inside an installed Android application: the dex is packaged into a signed APK
/// with a synthesized manifest, installed over adb, and launched as an activity. An activity
/// has no usable stdout, so this variant requires the socket monitor.
///
pub struct DeviceActivity {
    config: Arc<Config>,
    toolchain: Arc<dyn Toolchain>,
    device: Arc<dyn Target>,
    inner: DeviceDalvik,
}

impl DeviceActivity {
    pub fn new(
        config: Arc<Config>,
        toolchain: Arc<dyn Toolchain>,
        device: Arc<dyn Target>,
        dex_cache: HostCache,
        push_cache: TargetCache,
    ) -> DeviceActivity {
        let inner = DeviceDalvik::new(
            config.clone(),
            toolchain.clone(),
            device.clone(),
            dex_cache.clone(),
            push_cache,
        );
        DeviceActivity {
            config,
            toolchain,
            device,
            inner,
        }
    }

    fn keystore(&self) -> PathBuf {
        self.config.local_tmp.join("javelin.keystore")
    }

    ///
    /// The application package an action installs as. The fixed prefix guarantees the package
    /// name contains a `.` even for actions in the default package, which the platform requires.
    ///
    pub(crate) fn package_name(&self, action: &Action) -> String {
        format!("javelin.test.{}", action.file_name())
    }

    fn apk_path(&self, workdir: &std::path::Path, action: &Action) -> PathBuf {
        workdir.join(format!("{}.apk", action.file_name()))
    }

    pub(crate) fn manifest_text(&self, action: &Action) -> String {
        let package = self.package_name(action);
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="{package}">
  <uses-permission android:name="android.permission.INTERNET" />
  <application>
    <activity android:name="{package}.TestActivity">
      <intent-filter>
        <action android:name="android.intent.action.MAIN" />
        <category android:name="android.intent.category.LAUNCHER" />
      </intent-filter>
    </activity>
  </application>
</manifest>
"#
        )
    }
}

#[async_trait]
impl Mode for DeviceActivity {
    async fn prepare(&self) -> Result<(), String> {
        self.inner.prepare_device().await?;
        if !self.keystore().exists() {
            self.toolchain
                .generate_keystore(&self.keystore())
                .await
                .map_err(|failure| failure.into_text())?;
        }
        Ok(())
    }

    async fn build_and_install(&self, action: &Action) -> Option<Outcome> {
        let result: Result<(), Outcome> = async {
            let Some(jar) =
                build::build_jar(self.toolchain.as_ref(), &self.config, action).await?
            else {
                return Err(Outcome::from_text(
                    action.name(),
                    RunResult::Error,
                    "Activity packaging requires sources to package",
                ));
            };
            let workdir = build::workdir(action)?;
            let infra = |e: String| Outcome::from_text(action.name(), RunResult::Error, &e);
            let tool =
                |failure: crate::ToolFailure| {
                    Outcome::from_text(action.name(), RunResult::Error, &failure.into_text())
                };

            let apk_contents = workdir.join("apk");
            tokio::fs::create_dir_all(&apk_contents)
                .await
                .map_err(|e| {
                    infra(format!("Failed to create {}: {e}", apk_contents.display()))
                })?;
            // The platform loads exactly this name out of the APK.
            build::dex_jar(
                self.toolchain.as_ref(),
                self.inner.dex_cache(),
                action.name(),
                &jar,
                &apk_contents.join("classes.dex"),
            )
            .await?;

            let manifest = workdir.join("AndroidManifest.xml");
            tokio::fs::write(&manifest, self.manifest_text(action))
                .await
                .map_err(|e| infra(format!("Failed to write manifest: {e}")))?;

            let apk = self.apk_path(&workdir, action);
            self.toolchain
                .package_apk(&apk, &manifest, &apk_contents)
                .await
                .map_err(tool)?;
            self.toolchain
                .sign_apk(&apk, &self.keystore())
                .await
                .map_err(tool)?;
            self.toolchain.install_apk(&apk).await.map_err(tool)?;
            self.device
                .mkdirs(&self.config.runner_dir.join("tmp").join(action.file_name()))
                .await
                .map_err(infra)?;
            Ok(())
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
        let package = self.package_name(action);
        let scratch = self.config.runner_dir.join("tmp").join(action.file_name());
        let mut command = self.device.process_prefix(&scratch);
        command.extend([
            "am".to_owned(),
            "start".to_owned(),
            "-W".to_owned(),
            "-a".to_owned(),
            "android.intent.action.MAIN".to_owned(),
        ]);
        if let Some(port) = monitor_port {
            command.extend(["--ei".to_owned(), "monitorPort".to_owned(), port.to_string()]);
        }
        if let Some(skip_past) = skip_past {
            command.extend([
                "--es".to_owned(),
                "skipPast".to_owned(),
                skip_past.to_owned(),
            ]);
        }
        command.extend([
            "-n".to_owned(),
            format!("{package}/{package}.TestActivity"),
        ]);
        command
    }

    async fn cleanup(&self, action: &Action) -> Result<(), String> {
        self.inner.cleanup_scratch(action).await?;
        self.toolchain
            .uninstall(&self.package_name(action))
            .await
            .map_err(|failure| failure.into_text())
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.inner.shutdown_device().await
    }

    fn use_socket_monitor(&self) -> bool {
        // An activity cannot stream results over stdout; there is no stdout to read.
        true
    }
}
