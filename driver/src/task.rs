// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Deferred units of work and the scheduler that runs them.
//!
//! Dependency between tasks is expressed only through runnability predicates over other tasks'
//! results: a task becomes eligible when its predicate says so, and a task's result is assigned
//! exactly once. The scheduler re-evaluates predicates whenever anything completes, or when an
//! external party (a runner thread publishing a result slot) pokes it awake.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, warn};
use outcome::RunResult;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;

/// Which bounded worker pool a task occupies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pool {
    Build,
    Run,
}

type TaskOp = Pin<Box<dyn Future<Output = RunResult> + Send>>;
type Runnable = Box<dyn Fn() -> bool + Send + Sync>;

pub struct Task {
    name: String,
    pool: Pool,
    runnable: Runnable,
    op: Mutex<Option<TaskOp>>,
    started: AtomicBool,
    result: OnceLock<RunResult>,
}

impl Task {
    pub fn new(
        name: &str,
        pool: Pool,
        runnable: impl Fn() -> bool + Send + Sync + 'static,
        op: impl Future<Output = RunResult> + Send + 'static,
    ) -> Arc<Task> {
        Arc::new(Task {
            name: name.to_owned(),
            pool,
            runnable: Box::new(runnable),
            op: Mutex::new(Some(Box::pin(op))),
            started: AtomicBool::new(false),
            result: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result(&self) -> Option<RunResult> {
        self.result.get().copied()
    }

    pub fn succeeded(&self) -> bool {
        self.result() == Some(RunResult::Success)
    }

    fn is_runnable(&self) -> bool {
        (self.runnable)()
    }

    /// Claims the right to execute this task. At most one caller ever receives the op.
    fn try_start(&self) -> Option<TaskOp> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.op.lock().take()
    }

    fn complete(&self, result: RunResult) {
        if self.result.set(result).is_err() {
            warn!("Result for task `{}` was assigned twice", self.name);
        }
    }
}

///
/// Runs a set of tasks over two bounded pools. Tasks are spawned as soon as their predicates
/// allow; completion of any task (or an external wake) triggers re-evaluation. When no task is
/// running and none is eligible but unfinished tasks remain, the oldest one is failed to break
/// the stall: a predicate that can no longer come true must not hang the run.
///
pub struct Scheduler {
    build_slots: Arc<Semaphore>,
    run_slots: Arc<Semaphore>,
    wake: Arc<Notify>,
}

impl Scheduler {
    pub fn new(build_concurrency: usize, run_concurrency: usize) -> Scheduler {
        Scheduler {
            build_slots: Arc::new(Semaphore::new(build_concurrency.max(1))),
            run_slots: Arc::new(Semaphore::new(run_concurrency.max(1))),
            wake: Arc::new(Notify::new()),
        }
    }

    /// A handle external result publishers use to re-trigger scheduling.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub async fn run(&self, tasks: Vec<Arc<Task>>) {
        let mut running: JoinSet<()> = JoinSet::new();
        loop {
            for task in &tasks {
                if task.result().is_some() || !task.is_runnable() {
                    continue;
                }
                let Some(op) = task.try_start() else {
                    continue;
                };
                let slots = match task.pool {
                    Pool::Build => self.build_slots.clone(),
                    Pool::Run => self.run_slots.clone(),
                };
                let task = task.clone();
                let wake = self.wake.clone();
                running.spawn(async move {
                    let _permit = slots.acquire_owned().await.ok();
                    debug!("task `{}` starting", task.name());
                    let result = op.await;
                    debug!("task `{}` finished: {result}", task.name());
                    task.complete(result);
                    wake.notify_waiters();
                });
            }

            if tasks.iter().all(|task| task.result().is_some()) {
                break;
            }

            if running.is_empty() {
                if tasks
                    .iter()
                    .any(|task| task.result().is_none() && task.is_runnable())
                {
                    // Something became eligible since the spawn pass; go around again.
                    continue;
                }
                // Nothing can make progress. Fail one stalled task and re-evaluate: its
                // dependents may then run (cleanups fire on failure too).
                if let Some(stalled) = tasks.iter().find(|task| task.result().is_none()) {
                    warn!("Task `{}` can never run; failing it", stalled.name());
                    stalled.complete(RunResult::Error);
                }
                continue;
            }

            tokio::select! {
                _ = running.join_next() => {}
                _ = self.wake.notified() => {}
            }
        }
        while running.join_next().await.is_some() {}
    }
}
