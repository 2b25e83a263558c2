// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The build steps every variant shares: compile to classes, package a jar, translate to dex.
//! Each step converts tool failures into the synthetic outcome the pipeline reports for the
//! affected action, so callers thread `Result<_, Outcome>` straight through.

use std::path::{Path, PathBuf};

use action::Action;
use cache::{CacheKey, HostCache};
use log::debug;
use outcome::{Outcome, RunResult};

use crate::toolchain::{CompileSpec, Toolchain};
use crate::Config;

pub(crate) const DEX_NAMESPACE: &str = "dex";
pub(crate) const PUSHED_NAMESPACE: &str = "pushed";

/// The action's host-side working directory; assigned by the driver during preparation.
pub(crate) fn workdir(action: &Action) -> Result<PathBuf, Outcome> {
    action.user_dir().map(Path::to_owned).ok_or_else(|| {
        Outcome::from_text(
            action.name(),
            RunResult::Error,
            "Action has no working directory",
        )
    })
}

pub(crate) fn jar_path(workdir: &Path, action: &Action) -> PathBuf {
    workdir.join(format!("{}.jar", action.file_name()))
}

pub(crate) fn dex_jar_path(workdir: &Path, action: &Action) -> PathBuf {
    workdir.join(format!("{}.dx.jar", action.file_name()))
}

///
/// Creates (or, with `keep_before`, preserves) the action's working directory.
///
pub(crate) async fn prepare_workdir(config: &Config, action: &Action) -> Result<PathBuf, Outcome> {
    let workdir = workdir(action)?;
    let stale = |e: String| Outcome::from_text(action.name(), RunResult::Error, &e);
    if !config.keep_before && tokio::fs::try_exists(&workdir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&workdir)
            .await
            .map_err(|e| stale(format!("Failed to clear {}: {e}", workdir.display())))?;
    }
    tokio::fs::create_dir_all(&workdir)
        .await
        .map_err(|e| stale(format!("Failed to create {}: {e}", workdir.display())))?;
    Ok(workdir)
}

///
/// Compiles the action's sources and packages them as a jar. Actions named without a source
/// file are already present on the supplied classpath, so there is nothing to build: Ok(None).
///
pub(crate) async fn build_jar(
    toolchain: &dyn Toolchain,
    config: &Config,
    action: &Action,
) -> Result<Option<PathBuf>, Outcome> {
    let Some(source_file) = action.source_file() else {
        debug!("{} has no sources; skipping compile", action.name());
        return Ok(None);
    };
    let workdir = prepare_workdir(config, action).await?;

    let classes_dir = workdir.join("classes");
    tokio::fs::create_dir_all(&classes_dir).await.map_err(|e| {
        Outcome::from_text(
            action.name(),
            RunResult::Error,
            &format!("Failed to create {}: {e}", classes_dir.display()),
        )
    })?;

    let mut classpath = config.build_classpath.clone();
    classpath.append(&config.classpath);
    classpath.add(config.runner_jar.clone());
    let mut source_path = config.source_path.clone();
    if let Some(root) = action.source_path() {
        source_path.push(root.to_owned());
    }

    toolchain
        .javac(CompileSpec {
            sources: vec![source_file.to_owned()],
            classpath: &classpath,
            source_path: &source_path,
            destination: &classes_dir,
        })
        .await
        .map_err(|failure| {
            Outcome::from_text(
                action.name(),
                RunResult::CompileFailed,
                &failure.into_text(),
            )
        })?;

    let jar = jar_path(&workdir, action);
    toolchain.jar(&jar, &classes_dir).await.map_err(|failure| {
        Outcome::from_text(action.name(), RunResult::Error, &failure.into_text())
    })?;
    Ok(Some(jar))
}

///
/// Translates a jar to a dex jar, going through the fingerprint cache: identical input jars
/// are only ever dexed once per cache lifetime.
///
pub(crate) async fn dex_jar(
    toolchain: &dyn Toolchain,
    dex_cache: &HostCache,
    action_name: &str,
    jar: &Path,
    dex_out: &Path,
) -> Result<(), Outcome> {
    let infra = |e: String| Outcome::from_text(action_name, RunResult::Error, &e);
    let key = CacheKey::compute(DEX_NAMESPACE, jar).map_err(infra)?;
    if dex_cache.lookup(&key, dex_out).await.map_err(infra)? {
        return Ok(());
    }
    toolchain.dex(jar, dex_out).await.map_err(|failure| {
        Outcome::from_text(action_name, RunResult::Error, &failure.into_text())
    })?;
    dex_cache.publish(&key, dex_out).await.map_err(infra)?;
    Ok(())
}

/// The root to probe when waiting for a device filesystem, e.g. `/sdcard` for a runner
/// directory anywhere beneath it.
pub(crate) fn probe_path(runner_dir: &Path) -> PathBuf {
    let mut probe = PathBuf::from("/");
    if let Some(first) = runner_dir.components().nth(1) {
        probe.push(first);
    }
    probe
}
