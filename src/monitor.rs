//! Monitor lifecycle: owns the background scanning loop.
//!
//! The controller is the only owner of `MonitorState`, and the spawned loop
//! is the only owner of the scan engine (cursor + dedupe cache), so the
//! single-writer discipline those structures rely on falls out of ownership
//! rather than locking.
//!
//! `stop()` never interrupts an in-flight source read or external call: the
//! stop signal is checked between cycles and between events, and the
//! controller waits for the loop to drain before reporting Stopped.

use crate::analyze::{AnalysisClient, DiagnosticResult, RetryPolicy};
use crate::config::Config;
use crate::error::{AnalysisError, MonitorError};
use crate::remediate::{
    AutoApprove, CommandRunner, Confirmer, ExecutionOutcome, RemediationGate, ShellRunner,
    StdinConfirmer,
};
use crate::scan::{ErrorEvent, ScanEngine};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Process-wide guard: at most one monitor may be Running at a time, no
/// matter how many controllers exist.
static MONITOR_ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
    Stopping,
}

pub struct MonitorController {
    config: Config,
    state: MonitorState,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorController {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: MonitorState::Stopped,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Validate the configuration and spawn the background loop.
    ///
    /// Fails synchronously with `AlreadyRunning` if this controller (or any
    /// other in the process) is already running, and with a config error if
    /// the configuration cannot support a monitor at all.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.state != MonitorState::Stopped {
            return Err(MonitorError::AlreadyRunning);
        }

        self.config.validate()?;
        let engine = ScanEngine::new(&self.config)?;

        if MONITOR_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitorError::AlreadyRunning);
        }

        if self.config.sources.is_empty() {
            warn!("no log sources configured; the monitor will scan nothing");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker::from_config(&self.config, engine);

        let fut = worker.run(stop_rx);
        let handle = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                let detail = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                error!("monitor loop crashed unexpectedly: {detail}");
            }
            // The task releases the guard, not stop(): the loop also exits
            // when the controller is dropped without a stop() call, and the
            // guard must not outlive the loop either way.
            MONITOR_ACTIVE.store(false, Ordering::SeqCst);
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        self.state = MonitorState::Running;
        info!(
            interval_secs = self.config.scan_interval_secs,
            sources = self.config.sources.len(),
            "monitor started"
        );
        Ok(())
    }

    /// Signal the loop to finish its current work and wait for it to exit.
    pub async fn stop(&mut self) -> Result<(), MonitorError> {
        if self.state != MonitorState::Running {
            return Err(MonitorError::NotRunning);
        }

        self.state = MonitorState::Stopping;
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            // The task clears MONITOR_ACTIVE as it exits, so once the join
            // completes a fresh start is allowed again.
            let _ = handle.await;
        }

        self.state = MonitorState::Stopped;
        info!("monitor stopped");
        Ok(())
    }
}

/// Everything the background loop owns once it is spawned.
struct Worker {
    interval: Duration,
    engine: ScanEngine,
    client: AnalysisClient,
    retry: RetryPolicy,
    gate: RemediationGate,
}

impl Worker {
    fn from_config(config: &Config, engine: ScanEngine) -> Self {
        // A missing key is not a start-up error: it surfaces per event as a
        // logged AnalysisError. The key is read once here, so a key added
        // by `setup` takes effect on the next monitor start.
        let client = AnalysisClient::new(Config::get_api_key(), &config.model);

        let confirmer: Box<dyn Confirmer> = if config.auto_approve {
            Box::new(AutoApprove)
        } else {
            Box::new(StdinConfirmer)
        };
        let runner: Box<dyn CommandRunner> = Box::new(ShellRunner);
        let gate = RemediationGate::new(
            confirmer,
            runner,
            Duration::from_secs(config.command_timeout_secs),
            config.abort_on_decline,
        );

        Self {
            interval: Duration::from_secs(config.scan_interval_secs),
            engine,
            client,
            retry: RetryPolicy::default(),
            gate,
        }
    }

    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    // A dropped sender means the controller is gone; treat
                    // it like a stop signal.
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *stop_rx.borrow() {
                break;
            }

            let events = self.engine.scan_cycle();
            if !events.is_empty() {
                info!(count = events.len(), "scan cycle found new errors");
            }

            for event in events {
                let analyze = self
                    .client
                    .analyze_with_retry(&event, &self.retry);
                if let Some(outcomes) = process_event(&event, analyze, &self.gate).await {
                    for outcome in &outcomes {
                        info!(
                            command = %outcome.command,
                            approved = outcome.approved,
                            succeeded = outcome.succeeded,
                            exit_code = ?outcome.exit_code,
                            "remediation outcome"
                        );
                    }
                }
                // Finish the event in flight, but start no new ones.
                if *stop_rx.borrow() {
                    break;
                }
            }

            if *stop_rx.borrow() {
                break;
            }
        }
    }
}

/// Run the analysis → extraction → remediation pipeline for one event.
///
/// An analysis failure is isolated to this event: it is logged with enough
/// context to correlate the cycle, and `None` is returned so the caller
/// moves on to the next event.
pub(crate) async fn process_event<Fut>(
    event: &ErrorEvent,
    analyze: Fut,
    gate: &RemediationGate,
) -> Option<Vec<ExecutionOutcome>>
where
    Fut: Future<Output = Result<DiagnosticResult, AnalysisError>>,
{
    let diagnosis = match analyze.await {
        Ok(diagnosis) => diagnosis,
        Err(e) => {
            warn!(
                source = %event.source.display(),
                dedupe_key = %event.dedupe_key,
                "analysis failed for event: {e}"
            );
            return None;
        }
    };

    info!(
        source = %event.source.display(),
        dedupe_key = %event.dedupe_key,
        commands = diagnosis.commands.len(),
        "diagnosis received"
    );

    if diagnosis.commands.is_empty() {
        return Some(Vec::new());
    }
    Some(gate.apply(&diagnosis.commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn event(text: &str) -> ErrorEvent {
        ErrorEvent {
            source: PathBuf::from("/var/log/app.log"),
            raw_text: text.to_string(),
            matched_pattern: "error:".to_string(),
            timestamp: Utc::now(),
            dedupe_key: crate::scan::dedupe_key(text),
        }
    }

    struct CountingRunner {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl CommandRunner for CountingRunner {
        fn run(
            &self,
            command: &str,
            _timeout: Duration,
        ) -> Result<crate::remediate::RunOutput, String> {
            self.calls.lock().unwrap().push(command.to_string());
            Ok(crate::remediate::RunOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                timed_out: false,
            })
        }
    }

    fn counting_gate() -> (RemediationGate, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gate = RemediationGate::new(
            Box::new(AutoApprove),
            Box::new(CountingRunner {
                calls: calls.clone(),
            }),
            Duration::from_secs(5),
            false,
        );
        (gate, calls)
    }

    #[tokio::test]
    async fn test_lifecycle_state_machine() {
        let config = Config {
            sources: vec![],
            scan_interval_secs: 300,
            ..Config::default()
        };

        let mut controller = MonitorController::new(config.clone());
        assert_eq!(controller.state(), MonitorState::Stopped);

        controller.start().unwrap();
        assert_eq!(controller.state(), MonitorState::Running);

        // Second start on the same controller is rejected.
        assert!(matches!(
            controller.start(),
            Err(MonitorError::AlreadyRunning)
        ));

        // A second controller in the same process is rejected too.
        let mut second = MonitorController::new(config.clone());
        assert!(matches!(second.start(), Err(MonitorError::AlreadyRunning)));

        controller.stop().await.unwrap();
        assert_eq!(controller.state(), MonitorState::Stopped);

        assert!(matches!(
            controller.stop().await,
            Err(MonitorError::NotRunning)
        ));

        // The guard is released, so a fresh start works again.
        controller.start().unwrap();
        controller.stop().await.unwrap();

        // Dropping a Running controller without stop() must also release
        // the single-instance guard once the loop notices the dropped stop
        // channel; a later start is legal.
        {
            let mut abandoned = MonitorController::new(config.clone());
            abandoned.start().unwrap();
        }
        let mut fresh = MonitorController::new(config);
        let mut started = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if fresh.start().is_ok() {
                started = true;
                break;
            }
        }
        assert!(started, "guard still held after controller was dropped");
        fresh.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_prevents_start() {
        let config = Config {
            scan_interval_secs: 0,
            ..Config::default()
        };
        let mut controller = MonitorController::new(config);
        assert!(matches!(
            controller.start(),
            Err(MonitorError::Config(ConfigError::NonPositiveInterval))
        ));
        assert_eq!(controller.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_analysis_does_not_block_the_next_event() {
        let (gate, calls) = counting_gate();

        let first = event("error: transient outage");
        let result = process_event(
            &first,
            async { Err(AnalysisError::Malformed("timed out".to_string())) },
            &gate,
        )
        .await;
        assert!(result.is_none());
        assert!(calls.lock().unwrap().is_empty());

        let second = event("error: disk full");
        let diagnosis = DiagnosticResult {
            event: second.clone(),
            explanation: "Disk is full.\n$ df -h".to_string(),
            commands: vec!["df -h".to_string()],
        };
        let result = process_event(&second, async { Ok(diagnosis) }, &gate).await;

        let outcomes = result.expect("second event should be processed");
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].succeeded);
        assert_eq!(*calls.lock().unwrap(), vec!["df -h"]);
    }

    #[tokio::test]
    async fn test_diagnosis_without_commands_yields_empty_outcomes() {
        let (gate, calls) = counting_gate();
        let e = event("error: mystery");
        let diagnosis = DiagnosticResult {
            event: e.clone(),
            explanation: "No safe automatic fix.".to_string(),
            commands: vec![],
        };
        let outcomes = process_event(&e, async { Ok(diagnosis) }, &gate).await;
        assert_eq!(outcomes.unwrap().len(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }
}
