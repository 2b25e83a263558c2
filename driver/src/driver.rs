// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use action::Action;
use expectation::{Expectation, ExpectationStore, LARGE_TAG};
use log::{debug, error, info, warn};
use mode::{Mode, Variant, BENCHMARK_RUNNER_TAG};
use monitor::{Handler, HostMonitor};
use outcome::{Outcome, ResultValue, RunResult};
use outcome_store::OutcomeStore;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::child::{KillHandle, ManagedChild};
use crate::console::{Console, SummaryRecord};
use crate::discovery::Discovered;
use crate::task::{Pool, Scheduler, Task};

/// Expectations tagged `large` get this much more time.
pub const LARGE_TIMEOUT_MULTIPLIER: u32 = 10;

/// After its deadline passes, a process gets twice its timeout again before the kill, so
/// in-process stack dumps can still be captured.
const TIMEOUT_GRACE_MULTIPLIER: u32 = 2;

/// Builders hand completed actions to runners through a queue this deep.
const HANDOFF_CAPACITY: usize = 4;

/// A runner idle this long while builders are still alive concludes the input is wedged.
const EXHAUSTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The outcome name fatal, run-wide failures are reported under.
pub const GLOBAL_OUTCOME_NAME: &str = "javelin.Javelin";

///
/// Driver-level options for one run: the run-scoped context value everything reads instead of
/// global state.
///
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub variant: Variant,
    /// Per-action timeout; zero disables timeouts entirely.
    pub action_timeout: Duration,
    pub monitor_timeout: Duration,
    pub first_monitor_port: u16,
    pub stream: bool,
    pub benchmark: bool,
    /// A debugger will attach, so nothing may time out underneath it.
    pub debug: bool,
    pub keep_after: bool,
    pub local_tmp: PathBuf,
}

///
/// Orchestrates a run: synthesises the task graph, schedules it over the bounded pools, records
/// every outcome exactly once, and renders the final summary.
///
pub struct Driver {
    config: Arc<RunConfig>,
    mode: Arc<dyn Mode>,
    expectations: Arc<ExpectationStore>,
    store: Arc<OutcomeStore>,
    console: Arc<Console>,
    state: Mutex<RecordState>,
}

#[derive(Default)]
struct RecordState {
    records: BTreeMap<String, SummaryRecord>,
}

impl Driver {
    pub fn new(
        config: RunConfig,
        mode: Arc<dyn Mode>,
        expectations: Arc<ExpectationStore>,
        store: Arc<OutcomeStore>,
        console: Arc<Console>,
    ) -> Arc<Driver> {
        Arc::new(Driver {
            config: Arc::new(config),
            mode,
            expectations,
            store,
            console,
            state: Mutex::new(RecordState::default()),
        })
    }

    ///
    /// Runs everything discovered and returns the process exit code: 0 iff every recorded
    /// outcome matched its expectation.
    ///
    pub async fn run(self: &Arc<Self>, discovered: Discovered) -> i32 {
        for outcome in discovered.early_outcomes {
            self.record_outcome(outcome);
        }

        let actions = self.prepare_actions(discovered.actions);

        let build_concurrency = num_cpus::get();
        let runner_count =
            if self.config.stream || self.config.variant == Variant::DeviceActivity {
                1
            } else {
                num_cpus::get()
            };
        debug!("scheduling with {build_concurrency} builders and {runner_count} runners");

        let scheduler = Scheduler::new(build_concurrency, runner_count);
        let wake = scheduler.wake_handle();
        let tasks = self.synthesize_tasks(actions, runner_count, wake);
        scheduler.run(tasks).await;

        let records: Vec<SummaryRecord> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.records).into_values().collect()
        };
        self.console.summary(&records);
        if records.iter().all(|r| r.value != ResultValue::Fail) {
            0
        } else {
            1
        }
    }

    ///
    /// Applies the pre-run short circuits: declared-unsupported actions are recorded without
    /// building anything, duplicate names are rejected, and every surviving action gets its
    /// working directory.
    ///
    fn prepare_actions(&self, actions: Vec<Arc<Action>>) -> Vec<Arc<Action>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut prepared = Vec::new();
        for action in actions {
            if !seen.insert(action.name().to_owned()) {
                warn!("Duplicate action {}; ignoring the later one", action.name());
                continue;
            }
            let expectation = self.expectations.get_by_name_or_prefix(action.name());
            if expectation.result() == RunResult::Unsupported {
                info!("Skipping {}: declared unsupported", action.name());
                self.record_outcome(Outcome::from_text(
                    action.name(),
                    RunResult::Unsupported,
                    "Declared unsupported by the expectations database",
                ));
                continue;
            }
            let workdir = self
                .config
                .local_tmp
                .join("actions")
                .join(action.file_name());
            if let Err(e) = action.set_user_dir(workdir) {
                warn!("{e}");
            }
            prepared.push(action);
        }
        prepared
    }

    ///
    /// The task graph for one run: a one-shot prepare gating everything, per-action build
    /// chains feeding the bounded handoff queue, a pool of runner loops draining it, per-action
    /// cleanups, and a final shutdown.
    ///
    fn synthesize_tasks(
        self: &Arc<Self>,
        actions: Vec<Arc<Action>>,
        runner_count: usize,
        wake: Arc<tokio::sync::Notify>,
    ) -> Vec<Arc<Task>> {
        let mut tasks: Vec<Arc<Task>> = Vec::new();

        let prepare = {
            let driver = self.clone();
            Task::new("prepare", Pool::Build, || true, async move {
                match driver.mode.prepare().await {
                    Ok(()) => RunResult::Success,
                    Err(e) => {
                        error!("Preparation failed: {e}");
                        driver.record_outcome(Outcome::from_text(
                            GLOBAL_OUTCOME_NAME,
                            RunResult::Error,
                            &e,
                        ));
                        RunResult::Error
                    }
                }
            })
        };
        tasks.push(prepare.clone());

        let (handoff_tx, handoff_rx) = mpsc::channel::<Arc<Action>>(HANDOFF_CAPACITY);
        let handoff_rx = Arc::new(tokio::sync::Mutex::new(handoff_rx));
        let exhausted = Arc::new(AtomicBool::new(false));

        let mut run_slots: HashMap<String, Arc<OnceLock<RunResult>>> = HashMap::new();
        let mut build_tasks: Vec<(Arc<Action>, Arc<Task>)> = Vec::new();

        for action in actions {
            let run_slot: Arc<OnceLock<RunResult>> = Arc::new(OnceLock::new());
            run_slots.insert(action.name().to_owned(), run_slot.clone());

            let build = {
                let driver = self.clone();
                let action = action.clone();
                let tx = handoff_tx.clone();
                let prepare_gate = prepare.clone();
                let prepare = prepare.clone();
                Task::new(
                    &format!("build {}", action.name()),
                    Pool::Build,
                    move || prepare_gate.result().is_some(),
                    async move {
                        if !prepare.succeeded() {
                            // The run is already failing globally; adding per-action noise
                            // would bury the real error.
                            return RunResult::Error;
                        }
                        match driver.mode.build_and_install(&action).await {
                            Some(outcome) => {
                                let result = outcome.result();
                                driver.record_outcome(outcome);
                                result
                            }
                            None => {
                                if tx.send(action.clone()).await.is_err() {
                                    warn!("No runner took {}", action.name());
                                    return RunResult::Error;
                                }
                                RunResult::Success
                            }
                        }
                    },
                )
            };
            tasks.push(build.clone());
            build_tasks.push((action, build));
        }
        // Runners learn that the builders are done by the channel closing.
        drop(handoff_tx);

        let run_slots = Arc::new(run_slots);
        let mut runner_tasks: Vec<Arc<Task>> = Vec::new();
        for i in 0..runner_count {
            let monitor_port =
                self.config.first_monitor_port + (i % runner_count.max(1)) as u16;
            let driver = self.clone();
            let handoff_rx = handoff_rx.clone();
            let exhausted = exhausted.clone();
            let prepare_gate = prepare.clone();
            let prepare = prepare.clone();
            let run_slots = run_slots.clone();
            let wake = wake.clone();
            let task = Task::new(
                &format!("runner-{i}"),
                Pool::Run,
                move || prepare_gate.result().is_some(),
                async move {
                    if !prepare.succeeded() {
                        return RunResult::Success;
                    }
                    loop {
                        if exhausted.load(Ordering::SeqCst) {
                            break;
                        }
                        let received = tokio::time::timeout(EXHAUSTION_TIMEOUT, async {
                            handoff_rx.lock().await.recv().await
                        })
                        .await;
                        match received {
                            Ok(Some(action)) => {
                                driver.run_action(&action, monitor_port).await;
                                if let Some(slot) = run_slots.get(action.name()) {
                                    let _ = slot.set(RunResult::Success);
                                }
                                wake.notify_waiters();
                            }
                            Ok(None) => break,
                            Err(_) => {
                                warn!(
                                    "No runnable actions arrived for {}s; assuming the \
                                     builders are wedged and exiting",
                                    EXHAUSTION_TIMEOUT.as_secs()
                                );
                                exhausted.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    RunResult::Success
                },
            );
            tasks.push(task.clone());
            runner_tasks.push(task);
        }

        let runner_tasks = Arc::new(runner_tasks);
        for (action, build) in build_tasks {
            let run_slot = run_slots
                .get(action.name())
                .expect("every action has a run slot")
                .clone();
            let runners = runner_tasks.clone();
            let runnable = move || match build.result() {
                None => false,
                // Built and handed off: wait for its run, or for all runners to give up.
                Some(RunResult::Success) => {
                    run_slot.get().is_some()
                        || runners.iter().all(|runner| runner.result().is_some())
                }
                // Failed to build: only host-side scratch exists, clean it now.
                Some(_) => true,
            };
            let cleanup = {
                let driver = self.clone();
                let action = action.clone();
                Task::new(
                    &format!("cleanup {}", action.name()),
                    Pool::Build,
                    runnable,
                    async move {
                        if driver.config.keep_after {
                            debug!("Keeping scratch for {}", action.name());
                            return RunResult::Success;
                        }
                        if let Err(e) = driver.mode.cleanup(&action).await {
                            warn!("Cleanup for {} failed: {e}", action.name());
                        }
                        RunResult::Success
                    },
                )
            };
            tasks.push(cleanup);
        }

        let shutdown = {
            let driver = self.clone();
            let gates: Vec<Arc<Task>> = tasks.clone();
            Task::new(
                "shutdown",
                Pool::Build,
                move || gates.iter().all(|task| task.result().is_some()),
                async move {
                    match driver.mode.shutdown().await {
                        Ok(()) => RunResult::Success,
                        Err(e) => {
                            warn!("Shutdown failed: {e}");
                            RunResult::Error
                        }
                    }
                },
            )
        };
        tasks.push(shutdown);
        tasks
    }

    /// The timeout for one action, scaled up for declared-large tests, or None when timeouts
    /// are off (disabled, benchmarking, or a debugger is attached).
    fn action_timeout(&self, expectation: &Expectation) -> Option<Duration> {
        if self.config.action_timeout.is_zero() || self.config.benchmark || self.config.debug {
            return None;
        }
        if expectation.has_tag(LARGE_TAG) {
            Some(self.config.action_timeout * LARGE_TIMEOUT_MULTIPLIER)
        } else {
            Some(self.config.action_timeout)
        }
    }

    ///
    /// Executes one action to completion, relaunching with a `skip_past` cursor when the target
    /// process dies mid-run. Stops on normal completion, on timeout, or when a relaunch makes
    /// no progress.
    ///
    async fn run_action(&self, action: &Arc<Action>, monitor_port: u16) {
        let expectation = self.expectations.get_by_name_or_prefix(action.name());
        let timeout = self.action_timeout(&expectation);
        let use_socket = self.mode.use_socket_monitor();
        let mut skip_past: Option<String> = None;

        loop {
            let command = self.mode.create_action_command(
                action,
                skip_past.as_deref(),
                use_socket.then_some(monitor_port),
            );
            debug!("running {}: {}", action.name(), command.join(" "));

            let mut child = match ManagedChild::spawn(&command) {
                Ok(child) => child,
                Err(e) => {
                    self.record_outcome(Outcome::from_text(
                        action.name(),
                        RunResult::Error,
                        &e,
                    ));
                    return;
                }
            };
            let kill = child.kill_handle();
            let stdout = child.take_stdout();
            let stderr = child.take_stderr();

            let mut drains = Vec::new();
            if let Some(stderr) = stderr {
                drains.push(tokio::spawn(drain_to_log("stderr", stderr)));
            }
            // With the socket transport the process's stdout is not the wire; drain it so the
            // child never blocks on a full pipe.
            let monitored_stdout = if use_socket {
                if let Some(stdout) = stdout {
                    drains.push(tokio::spawn(drain_to_log("stdout", stdout)));
                }
                None
            } else {
                stdout
            };

            let kill_time: Arc<Mutex<Option<tokio::time::Instant>>> = Arc::new(Mutex::new(
                timeout.map(|t| tokio::time::Instant::now() + t),
            ));
            let timed_out = Arc::new(AtomicBool::new(false));
            let watcher = timeout.map(|t| {
                tokio::spawn(watch_for_timeout(
                    t,
                    kill_time.clone(),
                    timed_out.clone(),
                    kill.clone(),
                ))
            });

            let mut handler = DriverHandler {
                driver: self,
                timeout,
                kill_time: kill_time.clone(),
                attempt_started: Vec::new(),
                last_finished: None,
            };
            let host_monitor = HostMonitor::new(self.config.monitor_timeout);
            let completed = match monitored_stdout {
                Some(stdout) => host_monitor.monitor_stream(stdout, &mut handler).await,
                None if use_socket => {
                    host_monitor.monitor_socket(monitor_port, &mut handler).await
                }
                None => false,
            };
            let attempt_started = handler.attempt_started;
            let last_finished = handler.last_finished;

            if let Err(e) = child.wait().await {
                warn!("{e}");
            }
            if let Some(watcher) = watcher {
                watcher.abort();
            }
            for drain in drains {
                let _ = drain.await;
            }

            if completed {
                break;
            }

            if timed_out.load(Ordering::SeqCst) {
                let name = attempt_started
                    .last()
                    .cloned()
                    .unwrap_or_else(|| action.name().to_owned());
                let seconds = timeout.map(|t| t.as_secs()).unwrap_or(0);
                self.record_outcome(Outcome::from_text(
                    &name,
                    RunResult::ExecTimeout,
                    &format!("Timed out after {seconds} seconds"),
                ));
                break;
            }

            // The process died mid-run. Resume past the last started outcome, unless this
            // attempt made no progress: a relaunch that starts nothing new (or starts over
            // from the action itself) will never converge.
            let new_skip = attempt_started.last().cloned();
            let restarted_from_scratch =
                skip_past.is_some() && attempt_started.first().map(String::as_str) == Some(action.name());
            if new_skip.is_none() || new_skip == skip_past || restarted_from_scratch {
                self.record_outcome(Outcome::new(
                    action.name(),
                    RunResult::Error,
                    vec![
                        "Target process did not complete normally".to_owned(),
                        format!("timed out: {}", timed_out.load(Ordering::SeqCst)),
                        format!(
                            "last started outcome: {}",
                            new_skip.as_deref().unwrap_or("<none>")
                        ),
                        format!(
                            "last finished outcome: {}",
                            last_finished.as_deref().unwrap_or("<none>")
                        ),
                        format!("command: {}", command.join(" ")),
                    ],
                ));
                break;
            }
            info!(
                "Target process for {} died; resuming past {}",
                action.name(),
                new_skip.as_deref().unwrap()
            );
            skip_past = new_skip;
        }
    }

    ///
    /// Records one completed outcome: annotate (history and expectation resolution do file
    /// I/O, so this happens before any lock), render, persist, then account for it under the
    /// recording lock. Re-recording a name replaces the earlier entry.
    ///
    pub fn record_outcome(&self, outcome: Outcome) {
        let annotated = self.store.read(outcome);
        self.console.result(&annotated);
        if !self.config.benchmark {
            if let Err(e) = self
                .store
                .write(annotated.outcome(), annotated.changed_since_previous())
            {
                warn!(
                    "Failed to record history for {}: {e}",
                    annotated.outcome().name()
                );
            }
        }

        let record = SummaryRecord {
            name: annotated.outcome().name().to_owned(),
            actual: annotated.outcome().result(),
            expected: annotated.expectation().result(),
            value: annotated.result_value(),
        };
        let mut state = self.state.lock();
        state.records.insert(record.name.clone(), record);
    }

    #[cfg(test)]
    pub(crate) fn recorded_values(&self) -> Vec<(String, ResultValue)> {
        self.state
            .lock()
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.value))
            .collect()
    }
}

///
/// Tracks one attempt's progress and relays wire events: `start` pushes the kill deadline
/// back (and lifts it entirely for benchmark outcomes), `finish` records.
///
struct DriverHandler<'a> {
    driver: &'a Driver,
    timeout: Option<Duration>,
    kill_time: Arc<Mutex<Option<tokio::time::Instant>>>,
    attempt_started: Vec<String>,
    last_finished: Option<String>,
}

impl Handler for DriverHandler<'_> {
    fn start(&mut self, outcome_name: &str, runner_tag: &str) {
        debug!("started {outcome_name} ({runner_tag})");
        self.attempt_started.push(outcome_name.to_owned());
        let mut kill_time = self.kill_time.lock();
        if runner_tag == BENCHMARK_RUNNER_TAG {
            // Benchmarks run as long as they run.
            *kill_time = None;
        } else if let Some(timeout) = self.timeout {
            *kill_time = Some(tokio::time::Instant::now() + timeout);
        }
    }

    fn output(&mut self, outcome_name: &str, fragment: &str) {
        self.driver.console.output(outcome_name, fragment);
    }

    fn finish(&mut self, outcome: &Outcome) {
        self.last_finished = Some(outcome.name().to_owned());
        self.driver.record_outcome(outcome.clone());
    }

    fn print(&mut self, text: &str) {
        self.driver.console.print(text);
    }
}

///
/// Fires at the action's kill time. A deadline that moved (an outcome started) reschedules;
/// one that did not marks the action timed out, exactly once, waits out the grace period, and
/// kills the process group.
///
async fn watch_for_timeout(
    timeout: Duration,
    kill_time: Arc<Mutex<Option<tokio::time::Instant>>>,
    timed_out: Arc<AtomicBool>,
    kill: KillHandle,
) {
    loop {
        let Some(deadline) = *kill_time.lock() else {
            return;
        };
        tokio::time::sleep_until(deadline).await;
        match *kill_time.lock() {
            None => return,
            Some(current) if current > deadline => {
                // Pushed back since we went to sleep; watch the new deadline.
                continue;
            }
            Some(_) => {}
        }
        if timed_out
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let grace = timeout * TIMEOUT_GRACE_MULTIPLIER;
            warn!(
                "Action exceeded its {}s timeout; killing in {}s",
                timeout.as_secs(),
                grace.as_secs()
            );
            tokio::time::sleep(grace).await;
            if let Err(e) = kill.kill_group() {
                debug!("{e}");
            }
        }
        return;
    }
}

/// Keeps a pipe from backing up when nothing else is reading it.
async fn drain_to_log<R: AsyncRead + Unpin>(label: &'static str, pipe: R) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[{label}] {line}");
    }
}
