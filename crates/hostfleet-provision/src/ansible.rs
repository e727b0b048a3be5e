//! Ansible runner implementation.
//!
//! This module provides the [`Runner`] trait and the [`AnsibleRunner`]
//! implementation, which shells out to `ansible-playbook` or `ansible` with
//! the JSON stdout callback and reads facts and failures from its report.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::facts::HostFacts;
use crate::types::{Invocation, RunOutput, Task};

/// Number of trailing stderr lines kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Executes playbooks and ad-hoc modules against a single host.
///
/// Implementations must honor the invocation's deadline and cancellation
/// token, and kill any in-flight work when either fires.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a task against a host.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Failed` when the runner reports a failure,
    /// `RunnerError::TimedOut` or `RunnerError::Cancelled` when the run was
    /// killed, and `RunnerError::Spawn` if the runner could not be started.
    async fn run(&self, invocation: &Invocation) -> Result<RunOutput>;
}

/// Runner backed by the Ansible command-line tools.
pub struct AnsibleRunner {
    config: RunnerConfig,
}

impl AnsibleRunner {
    /// Create a runner with the given configuration.
    #[must_use]
    pub const fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Get the runner configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Build the program and argument list for an invocation.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Spawn` if the variables cannot be encoded.
    pub fn command_line(&self, invocation: &Invocation) -> Result<(OsString, Vec<OsString>)> {
        let target = &invocation.target;
        let extra_vars = serde_json::to_string(&invocation.variables)
            .map_err(|e| RunnerError::Spawn(format!("encoding variables: {e}")))?;

        let mut args: Vec<OsString> = Vec::new();
        let program = match &invocation.task {
            Task::Playbook(_) => self.config.ansible_playbook_bin.clone().into_os_string(),
            Task::Module(_) => {
                args.push("all".into());
                self.config.ansible_bin.clone().into_os_string()
            }
        };

        args.push("-i".into());
        args.push(format!("{}:{},", target.address, target.port).into());
        args.push("-u".into());
        args.push(target.user.clone().into());
        if let Some(key) = &target.private_key {
            args.push("--private-key".into());
            args.push(key.clone().into_os_string());
        }
        args.push("-e".into());
        args.push(extra_vars.into());

        match &invocation.task {
            Task::Playbook(name) => args.push(self.config.playbook_dir.join(name).into_os_string()),
            Task::Module(name) => {
                args.push("-m".into());
                args.push(name.into());
            }
        }

        Ok((program, args))
    }
}

#[async_trait]
impl Runner for AnsibleRunner {
    async fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        let (program, args) = self.command_line(invocation)?;
        let started = Instant::now();

        info!(
            address = %invocation.target.address,
            task = %invocation.task.name(),
            timeout_secs = invocation.timeout.as_secs(),
            "Starting ansible run"
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .env("ANSIBLE_STDOUT_CALLBACK", "json")
            .env("ANSIBLE_LOAD_CALLBACK_PLUGINS", "1")
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .envs(&self.config.extra_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{}: {e}", program.to_string_lossy())))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            () = invocation.cancel.cancelled() => {
                warn!(address = %invocation.target.address, "Ansible run cancelled");
                return Err(RunnerError::Cancelled);
            }
            result = tokio::time::timeout(invocation.timeout, child.wait_with_output()) => {
                match result {
                    Ok(output) => output.map_err(|e| RunnerError::Spawn(e.to_string()))?,
                    Err(_) => {
                        warn!(
                            address = %invocation.target.address,
                            timeout_secs = invocation.timeout.as_secs(),
                            "Ansible run timed out"
                        );
                        return Err(RunnerError::TimedOut {
                            seconds: invocation.timeout.as_secs(),
                        });
                    }
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let report = parse_callback_output(&stdout);

        debug!(
            address = %invocation.target.address,
            exit_code = ?output.status.code(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Ansible run finished"
        );

        if !output.status.success() {
            let message = report
                .ok()
                .filter(|r| !r.failures.is_empty())
                .map(|r| r.failures.join("; "))
                .or_else(|| tail(&stderr))
                .unwrap_or_else(|| format!("ansible exited with {}", output.status));
            return Err(RunnerError::Failed {
                message,
                exit_code: output.status.code(),
            });
        }

        let report = report.map_err(RunnerError::InvalidOutput)?;
        if !report.failures.is_empty() {
            return Err(RunnerError::Failed {
                message: report.failures.join("; "),
                exit_code: output.status.code(),
            });
        }

        Ok(RunOutput {
            facts: HostFacts::from_ansible(&report.facts),
            changed: report.changed,
        })
    }
}

/// What the JSON callback reported for a run.
#[derive(Debug, Default)]
pub(crate) struct CallbackReport {
    pub(crate) facts: Map<String, Value>,
    pub(crate) failures: Vec<String>,
    pub(crate) changed: u64,
}

/// Parse the document written by the `json` stdout callback.
///
/// Anything printed before the first `{` (deprecation banners and the like)
/// is skipped.
pub(crate) fn parse_callback_output(stdout: &str) -> std::result::Result<CallbackReport, String> {
    let start = stdout
        .find('{')
        .ok_or_else(|| "no JSON document in runner output".to_string())?;
    let document: Value =
        serde_json::from_str(&stdout[start..]).map_err(|e| format!("runner output: {e}"))?;

    let mut report = CallbackReport::default();

    let plays = document
        .get("plays")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    for task in plays
        .iter()
        .filter_map(|play| play.get("tasks").and_then(Value::as_array))
        .flatten()
    {
        let task_name = task
            .pointer("/task/name")
            .and_then(Value::as_str)
            .unwrap_or("task");
        let Some(hosts) = task.get("hosts").and_then(Value::as_object) else {
            continue;
        };
        for result in hosts.values() {
            if let Some(facts) = result.get("ansible_facts").and_then(Value::as_object) {
                report
                    .facts
                    .extend(facts.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            let failed = result.get("failed").and_then(Value::as_bool) == Some(true);
            let unreachable = result.get("unreachable").and_then(Value::as_bool) == Some(true);
            let ignored = result.get("ignore_errors").and_then(Value::as_bool) == Some(true);
            if (failed || unreachable) && !ignored {
                let msg = result
                    .get("msg")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .map_or_else(|| format!("{task_name} failed"), ToString::to_string);
                report.failures.push(msg);
            }
        }
    }

    if let Some(stats) = document.get("stats").and_then(Value::as_object) {
        report.changed = stats
            .values()
            .filter_map(|s| s.get("changed").and_then(Value::as_u64))
            .sum();
    }

    Ok(report)
}

fn tail(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Some(lines[skip..].join("\n"))
}

/// Mock runner for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// A runner that replays scripted outcomes and records every invocation.
    ///
    /// Outcomes are consumed in FIFO order; once the script is empty the
    /// default outcome (success with no facts) is returned. A configured
    /// delay honors the invocation's deadline and cancellation token the
    /// same way [`AnsibleRunner`] does.
    #[derive(Default)]
    pub struct MockRunner {
        script: Mutex<VecDeque<Result<RunOutput>>>,
        fallback: Mutex<Option<Result<RunOutput>>>,
        delay: Mutex<Option<Duration>>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl MockRunner {
        /// Create a mock runner that succeeds with no facts.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue an outcome for the next call.
        pub fn push_outcome(&self, outcome: Result<RunOutput>) {
            self.script.lock().push_back(outcome);
        }

        /// Queue a successful run reporting the given facts.
        pub fn push_facts(&self, facts: HostFacts) {
            self.push_outcome(Ok(RunOutput { facts, changed: 1 }));
        }

        /// Queue a runner-reported failure.
        pub fn push_failure(&self, message: impl Into<String>) {
            self.push_outcome(Err(RunnerError::Failed {
                message: message.into(),
                exit_code: Some(2),
            }));
        }

        /// Outcome returned once the script is exhausted.
        pub fn set_fallback(&self, outcome: Result<RunOutput>) {
            *self.fallback.lock() = Some(outcome);
        }

        /// Make every call take this long before producing its outcome.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = Some(delay);
        }

        /// All invocations received so far.
        #[must_use]
        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().clone()
        }

        /// Number of invocations received so far.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn next_outcome(&self) -> Result<RunOutput> {
            if let Some(outcome) = self.script.lock().pop_front() {
                return outcome;
            }
            self.fallback
                .lock()
                .clone()
                .unwrap_or_else(|| Ok(RunOutput::default()))
        }
    }

    #[async_trait]
    impl Runner for MockRunner {
        async fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
            self.calls.lock().push(invocation.clone());
            let outcome = self.next_outcome();

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::select! {
                    biased;
                    () = invocation.cancel.cancelled() => return Err(RunnerError::Cancelled),
                    result = tokio::time::timeout(invocation.timeout, tokio::time::sleep(delay)) => {
                        if result.is_err() {
                            return Err(RunnerError::TimedOut {
                                seconds: invocation.timeout.as_secs(),
                            });
                        }
                    }
                }
            } else if invocation.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            outcome
        }
    }
}
