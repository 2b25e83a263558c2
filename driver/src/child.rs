// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use nix::sys::signal;
use nix::unistd::{getpgid, Pid};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

///
/// A target process running in its own process group, so that killing it takes its whole tree
/// (VMs fork helpers) and not just the immediate child. Dropping an unkilled ManagedChild
/// kills the group.
///
pub struct ManagedChild {
    child: Child,
    kill: KillHandle,
}

/// A cheap handle the timeout watcher holds: enough to kill the group without owning the child.
#[derive(Clone)]
pub struct KillHandle {
    pid: i32,
    killed: Arc<AtomicBool>,
}

impl KillHandle {
    pub fn kill_group(&self) -> Result<(), String> {
        let pgid = getpgid(Some(Pid::from_raw(self.pid)))
            .map_err(|e| format!("Could not get process group of child: {e}"))?;
        // The negative pgid addresses the entire group.
        signal::kill(Pid::from_raw(-pgid.as_raw()), signal::Signal::SIGKILL)
            .map_err(|e| format!("Failed to kill child process group: {e}"))?;
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl ManagedChild {
    pub fn spawn(argv: &[String]) -> Result<ManagedChild, String> {
        if argv.is_empty() {
            return Err("Cannot spawn an empty command".to_owned());
        }
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Encourage tokio to reap the process if we are torn down first.
            .kill_on_drop(true);

        // Place the child in its own process group as it starts, so the group can be killed
        // safely later.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map(|_| ()).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Could not create new process group: {e}"),
                    )
                })
            });
        }

        let child = command
            .spawn()
            .map_err(|e| format!("Error launching `{}`: {e}", argv.join(" ")))?;
        let pid = child
            .id()
            .ok_or_else(|| "Child process had no pid".to_owned())? as i32;
        debug!("spawned {} as pid {pid}", argv[0]);
        Ok(ManagedChild {
            child,
            kill: KillHandle {
                pid,
                killed: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Waits for the child to exit; returns whether it exited successfully.
    pub async fn wait(&mut self) -> Result<bool, String> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| format!("Failed to wait for child: {e}"))?;
        self.kill.killed.store(true, Ordering::SeqCst);
        Ok(status.success())
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        if !self.kill.was_killed() {
            let _ = self.kill.kill_group();
        }
    }
}
