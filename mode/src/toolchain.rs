// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::Classpath;

///
/// A failed tool invocation, with the output it produced: compile errors become the output of a
/// `COMPILE_FAILED` outcome, so the text is kept verbatim.
///
#[derive(Debug)]
pub struct ToolFailure {
    pub summary: String,
    pub output: String,
}

impl ToolFailure {
    pub fn into_text(self) -> String {
        if self.output.is_empty() {
            self.summary
        } else {
            format!("{}\n{}", self.summary, self.output)
        }
    }
}

#[derive(Debug)]
pub struct CompileSpec<'a> {
    pub sources: Vec<PathBuf>,
    pub classpath: &'a Classpath,
    pub source_path: &'a [PathBuf],
    pub destination: &'a Path,
}

///
/// The concrete build and device tools, behind a small interface so the modes can be exercised
/// without a JDK or an attached device. The flag vocabulary below is the tools' own; nothing
/// else in the system knows it.
///
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn javac(&self, spec: CompileSpec<'_>) -> Result<(), ToolFailure>;

    async fn jar(&self, jar_out: &Path, classes_dir: &Path) -> Result<(), ToolFailure>;

    async fn dex(&self, jar_in: &Path, dex_out: &Path) -> Result<(), ToolFailure>;

    async fn package_apk(
        &self,
        apk_out: &Path,
        manifest: &Path,
        contents_dir: &Path,
    ) -> Result<(), ToolFailure>;

    async fn sign_apk(&self, apk: &Path, keystore: &Path) -> Result<(), ToolFailure>;

    /// Creates a throwaway signing keystore for test APKs.
    async fn generate_keystore(&self, keystore: &Path) -> Result<(), ToolFailure>;

    async fn install_apk(&self, apk: &Path) -> Result<(), ToolFailure>;

    async fn uninstall(&self, package: &str) -> Result<(), ToolFailure>;
}

/// Password for the throwaway signing keystore; it protects nothing.
const KEYSTORE_PASSWORD: &str = "javelin";

///
/// The real toolchain: shells out to `javac`, `dx`, `aapt`, `jarsigner`, `keytool` and `adb`,
/// all expected on the PATH unless overridden.
///
pub struct ExecToolchain {
    pub javac: String,
    pub jar: String,
    pub dx: String,
    pub aapt: String,
    pub jarsigner: String,
    pub keytool: String,
    pub adb: String,
}

impl Default for ExecToolchain {
    fn default() -> ExecToolchain {
        ExecToolchain {
            javac: "javac".to_owned(),
            jar: "jar".to_owned(),
            dx: "dx".to_owned(),
            aapt: "aapt".to_owned(),
            jarsigner: "jarsigner".to_owned(),
            keytool: "keytool".to_owned(),
            adb: "adb".to_owned(),
        }
    }
}

async fn run_tool(tool: &str, args: &[String]) -> Result<(), ToolFailure> {
    debug!("executing {tool} {}", args.join(" "));
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ToolFailure {
            summary: format!("Failed to execute `{tool}`: {e}"),
            output: String::new(),
        })?;
    if output.status.success() {
        return Ok(());
    }
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    Err(ToolFailure {
        summary: format!("`{tool}` failed ({})", output.status),
        output: text,
    })
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl Toolchain for ExecToolchain {
    async fn javac(&self, spec: CompileSpec<'_>) -> Result<(), ToolFailure> {
        let mut args = vec!["-g".to_owned(), "-d".to_owned(), path_arg(spec.destination)];
        if !spec.classpath.is_empty() {
            args.push("-classpath".to_owned());
            args.push(spec.classpath.to_string());
        }
        if !spec.source_path.is_empty() {
            args.push("-sourcepath".to_owned());
            args.push(
                Classpath::of(spec.source_path.iter().cloned()).to_string(),
            );
        }
        args.extend(spec.sources.iter().map(|s| path_arg(s)));
        run_tool(&self.javac, &args).await
    }

    async fn jar(&self, jar_out: &Path, classes_dir: &Path) -> Result<(), ToolFailure> {
        run_tool(
            &self.jar,
            &[
                "cf".to_owned(),
                path_arg(jar_out),
                "-C".to_owned(),
                path_arg(classes_dir),
                ".".to_owned(),
            ],
        )
        .await
    }

    async fn dex(&self, jar_in: &Path, dex_out: &Path) -> Result<(), ToolFailure> {
        run_tool(
            &self.dx,
            &[
                "--dex".to_owned(),
                format!("--output={}", dex_out.display()),
                path_arg(jar_in),
            ],
        )
        .await
    }

    async fn package_apk(
        &self,
        apk_out: &Path,
        manifest: &Path,
        contents_dir: &Path,
    ) -> Result<(), ToolFailure> {
        run_tool(
            &self.aapt,
            &[
                "package".to_owned(),
                "-f".to_owned(),
                "-M".to_owned(),
                path_arg(manifest),
                "-F".to_owned(),
                path_arg(apk_out),
                path_arg(contents_dir),
            ],
        )
        .await
    }

    async fn sign_apk(&self, apk: &Path, keystore: &Path) -> Result<(), ToolFailure> {
        run_tool(
            &self.jarsigner,
            &[
                "-keystore".to_owned(),
                path_arg(keystore),
                "-storepass".to_owned(),
                KEYSTORE_PASSWORD.to_owned(),
                path_arg(apk),
                "javelin".to_owned(),
            ],
        )
        .await
    }

    async fn generate_keystore(&self, keystore: &Path) -> Result<(), ToolFailure> {
        run_tool(
            &self.keytool,
            &[
                "-genkeypair".to_owned(),
                "-alias".to_owned(),
                "javelin".to_owned(),
                "-keyalg".to_owned(),
                "RSA".to_owned(),
                "-validity".to_owned(),
                "365".to_owned(),
                "-dname".to_owned(),
                "CN=javelin".to_owned(),
                "-keystore".to_owned(),
                path_arg(keystore),
                "-storepass".to_owned(),
                KEYSTORE_PASSWORD.to_owned(),
                "-keypass".to_owned(),
                KEYSTORE_PASSWORD.to_owned(),
            ],
        )
        .await
    }

    async fn install_apk(&self, apk: &Path) -> Result<(), ToolFailure> {
        run_tool(
            &self.adb,
            &["install".to_owned(), "-r".to_owned(), path_arg(apk)],
        )
        .await
    }

    async fn uninstall(&self, package: &str) -> Result<(), ToolFailure> {
        run_tool(&self.adb, &["uninstall".to_owned(), package.to_owned()]).await
    }
}
