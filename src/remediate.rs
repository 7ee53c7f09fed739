//! The remediation gate: confirmation and execution of suggested commands.
//!
//! This is the only part of logmedic allowed to mutate host state. Every
//! command goes through a `Confirmer` first (unless the gate was built in
//! auto-approve mode), and every attempt is recorded as an
//! `ExecutionOutcome`: failures are data here, not errors.

use crate::util::{self, truncate};
use std::io::{self, Write};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

/// What happened to one candidate command.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub command: String,
    pub approved: bool,
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecutionOutcome {
    fn declined(command: &str) -> Self {
        Self {
            command: command.to_string(),
            approved: false,
            succeeded: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
        }
    }
}

/// Pluggable confirmation capability. Swapped for an always-yes
/// implementation in auto-approve mode and a scripted one in tests.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, command: &str) -> bool;
}

/// Approves everything without asking.
pub struct AutoApprove;

impl Confirmer for AutoApprove {
    fn confirm(&self, _command: &str) -> bool {
        true
    }
}

/// Blocks on stdin for an explicit yes/no. Anything other than an
/// affirmative answer declines the command.
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, command: &str) -> bool {
        println!();
        println!("  Suggested fix:");
        println!("    {}", command);
        print!("  Run this command? [y/N]: ");
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Captured output of one command run.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// The OS-level command boundary, pluggable so tests can count invocations
/// without touching a shell.
pub trait CommandRunner: Send + Sync {
    /// Returns the captured output, or `Err` when the command could not be
    /// spawned at all.
    fn run(&self, command: &str, timeout: Duration) -> Result<RunOutput, String>;
}

/// Runs commands through `sh -c`.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<RunOutput, String> {
        let result =
            util::run_command_with_timeout(Command::new("sh").arg("-c").arg(command), timeout)?;
        Ok(RunOutput {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.status.and_then(|s| s.code()),
            timed_out: result.timed_out,
        })
    }
}

pub struct RemediationGate {
    confirmer: Box<dyn Confirmer>,
    runner: Box<dyn CommandRunner>,
    command_timeout: Duration,
    abort_on_decline: bool,
}

impl RemediationGate {
    pub fn new(
        confirmer: Box<dyn Confirmer>,
        runner: Box<dyn CommandRunner>,
        command_timeout: Duration,
        abort_on_decline: bool,
    ) -> Self {
        Self {
            confirmer,
            runner,
            command_timeout,
            abort_on_decline,
        }
    }

    /// Offer each command in order, run the approved ones, and record every
    /// outcome. A declined command does not abort the batch unless
    /// `abort_on_decline` was configured.
    pub fn apply(&self, commands: &[String]) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(commands.len());

        for command in commands {
            if !self.confirmer.confirm(command) {
                info!(command = %truncate(command, 120), "command declined");
                outcomes.push(ExecutionOutcome::declined(command));
                if self.abort_on_decline {
                    break;
                }
                continue;
            }

            outcomes.push(self.execute(command));
        }

        outcomes
    }

    fn execute(&self, command: &str) -> ExecutionOutcome {
        match self.runner.run(command, self.command_timeout) {
            Ok(output) => {
                let succeeded = !output.timed_out && output.exit_code == Some(0);
                if succeeded {
                    info!(command = %truncate(command, 120), "command succeeded");
                } else if output.timed_out {
                    warn!(command = %truncate(command, 120), "command timed out");
                } else {
                    warn!(
                        command = %truncate(command, 120),
                        exit_code = ?output.exit_code,
                        "command failed"
                    );
                }
                ExecutionOutcome {
                    command: command.to_string(),
                    approved: true,
                    succeeded,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: output.exit_code,
                }
            }
            Err(spawn_error) => {
                warn!(command = %truncate(command, 120), "could not spawn: {spawn_error}");
                ExecutionOutcome {
                    command: command.to_string(),
                    approved: true,
                    succeeded: false,
                    stdout: String::new(),
                    stderr: spawn_error,
                    exit_code: None,
                }
            }
        }
    }
}
