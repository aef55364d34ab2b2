//! Validation engine: bounded-concurrency probing over a batch of candidates

use crate::error::EngineError;
use crate::proxy::models::{Candidate, ProbeOutcome, ProtocolKind};
use crate::proxy::probe::{ProbeConfig, ProbeExecutor};
use crate::proxy::store::{ResultStore, RunLogs};
use crate::Config;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Default ceiling on simultaneous probes
pub const DEFAULT_MAX_CONCURRENCY: usize = 500;

/// A progress notification is published every this many completed probes
const PROGRESS_EVERY: usize = 10;

/// Live counters for the current cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCounters {
    /// Completed probes
    pub checked: usize,
    /// Completed probes that found a working protocol
    pub valid: usize,
    /// Candidates in the current cycle
    pub total: usize,
    pub last_run: Option<DateTime<Utc>>,
}

/// Advisory progress figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub checked: usize,
    pub total: usize,
    pub valid: usize,
}

/// Totals for one finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub checked: usize,
    pub valid: usize,
}

/// Owns the admission gate, the counters and the write path into the store
#[derive(Clone)]
pub struct ValidationEngine {
    executor: ProbeExecutor,
    store: ResultStore,
    logs: RunLogs,
    max_concurrency: usize,
    counters: Arc<Mutex<EngineCounters>>,
    progress: Arc<watch::Sender<Progress>>,
}

impl ValidationEngine {
    pub fn new(
        executor: ProbeExecutor,
        store: ResultStore,
        logs: RunLogs,
        max_concurrency: usize,
    ) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            executor,
            store,
            logs,
            max_concurrency: max_concurrency.max(1),
            counters: Arc::new(Mutex::new(EngineCounters::default())),
            progress: Arc::new(progress),
        }
    }

    /// Build an engine that probes over real HTTP
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ProbeExecutor::new(config.probe.clone()),
            ResultStore::new(&config.output_path),
            RunLogs::new(&config.valid_log_path, &config.invalid_log_path),
            config.max_concurrency,
        )
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn logs(&self) -> &RunLogs {
        &self.logs
    }

    pub fn probe_config(&self) -> &ProbeConfig {
        self.executor.config()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Snapshot of the live counters
    pub fn stats(&self) -> EngineCounters {
        self.lock_counters().clone()
    }

    /// Zero the counters and stamp a new run time
    pub fn reset_counters(&self) {
        let mut counters = self.lock_counters();
        *counters = EngineCounters {
            last_run: Some(Utc::now()),
            ..EngineCounters::default()
        };
        self.progress.send_replace(Progress::default());
    }

    pub fn set_total(&self, total: usize) {
        self.lock_counters().total = total;
    }

    /// Receive the advisory progress published every tenth completion
    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Probe one candidate right away, outside the admission gate.
    ///
    /// Nothing is recorded; the outcome is only returned.
    pub async fn check_single(
        &self,
        candidate: &Candidate,
        protocols: &[ProtocolKind],
    ) -> ProbeOutcome {
        self.executor.probe(candidate, protocols).await
    }

    /// Probe every candidate with at most `max_concurrency` probes in flight.
    ///
    /// Individual probe failures never abort the batch. A fatal persistence
    /// error stops dispatching, aborts probes still running and is returned.
    pub async fn run_batch(
        &self,
        candidates: Vec<Candidate>,
        protocols: &[ProtocolKind],
        save_invalid: bool,
    ) -> Result<BatchSummary, EngineError> {
        let gate = Arc::new(Semaphore::new(self.max_concurrency));
        let protocols: Arc<[ProtocolKind]> = protocols.into();
        let mut tasks = JoinSet::new();
        let mut summary = BatchSummary::default();

        info!(
            candidates = candidates.len(),
            max_concurrency = self.max_concurrency,
            protocols = ?protocols,
            "starting validation batch"
        );

        for candidate in candidates {
            // The permit moves into the task and is released when it ends, on any path
            let permit = Arc::clone(&gate)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::GateClosed)?;

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = self.settle(joined, &mut summary) {
                    tasks.abort_all();
                    return Err(e);
                }
            }

            let engine = self.clone();
            let protocols = Arc::clone(&protocols);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = engine.executor.probe(&candidate, &protocols).await;
                engine.complete(outcome, save_invalid).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = self.settle(joined, &mut summary) {
                tasks.abort_all();
                return Err(e);
            }
        }

        info!(
            checked = summary.checked,
            valid = summary.valid,
            "validation batch finished"
        );
        Ok(summary)
    }

    fn settle(
        &self,
        joined: Result<Result<bool, EngineError>, tokio::task::JoinError>,
        summary: &mut BatchSummary,
    ) -> Result<(), EngineError> {
        match joined {
            Ok(Ok(valid)) => {
                summary.checked += 1;
                if valid {
                    summary.valid += 1;
                }
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "aborting validation batch");
                Err(e)
            }
            Err(e) if e.is_panic() => {
                // The probe never reached completion handling; count it as invalid
                error!(error = %e, "probe task panicked");
                self.count(false);
                summary.checked += 1;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "probe task cancelled");
                Ok(())
            }
        }
    }

    /// Completion handling for one probe: persist, log, count
    async fn complete(
        &self,
        outcome: ProbeOutcome,
        save_invalid: bool,
    ) -> Result<bool, EngineError> {
        let mut persisted = Ok(());

        if let Some(entry) = outcome.entry() {
            if let Err(e) = self.store.append_valid(&entry).await {
                if e.is_fatal() {
                    persisted = Err(EngineError::Store(e));
                } else {
                    error!(%entry, error = %e, "failed to persist valid proxy, result dropped");
                }
            }
            if let Err(e) = self.logs.append_valid(&entry).await {
                warn!(%entry, error = %e, "failed to append to valid log");
            }
        } else if save_invalid {
            if let Err(e) = self.logs.append_invalid(outcome.candidate.as_str()).await {
                warn!(candidate = %outcome.candidate, error = %e, "failed to append to invalid log");
            }
        }

        self.count(outcome.valid);
        persisted.map(|_| outcome.valid)
    }

    /// Count one completed probe under the counter lock
    fn count(&self, valid: bool) {
        let progress = {
            let mut counters = self.lock_counters();
            counters.checked += 1;
            if valid {
                counters.valid += 1;
            }
            (counters.checked % PROGRESS_EVERY == 0).then(|| Progress {
                checked: counters.checked,
                total: counters.total,
                valid: counters.valid,
            })
        };

        if let Some(progress) = progress {
            info!(
                checked = progress.checked,
                total = progress.total,
                valid = progress.valid,
                "progress"
            );
            self.progress.send_replace(progress);
        }
    }

    fn lock_counters(&self) -> MutexGuard<'_, EngineCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
