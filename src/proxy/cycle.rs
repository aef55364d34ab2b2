//! One full validation cycle: reset, acquire candidates, validate, report

use crate::proxy::engine::ValidationEngine;
use crate::proxy::models::{Candidate, ProtocolKind};
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::info;

/// Supplier of candidates for a cycle (a file, scraped lists, ...)
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self) -> Result<Vec<Candidate>>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Summary of a finished cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub total: usize,
    pub checked: usize,
    pub valid: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Drives validation cycles against one engine
#[derive(Clone)]
pub struct CycleController {
    engine: ValidationEngine,
}

impl CycleController {
    pub fn new(engine: ValidationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    /// Run one self-contained cycle.
    ///
    /// Results of the previous cycle stay readable until this call clears
    /// them at its start.
    pub async fn run_cycle(
        &self,
        source: &dyn CandidateSource,
        protocols: &[ProtocolKind],
        save_invalid: bool,
    ) -> Result<CycleReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(source = %source.describe(), "starting proxy check cycle");

        let store = self.engine.store();
        store
            .reinitialize()
            .await
            .with_context(|| format!("failed to initialize {:?}", store.path()))?;
        self.engine
            .logs()
            .truncate(save_invalid)
            .await
            .context("failed to truncate run logs")?;
        self.engine.reset_counters();
        store
            .mark_checked(started_at)
            .await
            .context("failed to record check time")?;

        let candidates = source
            .candidates()
            .await
            .with_context(|| format!("failed to load candidates from {}", source.describe()))?;
        let total = candidates.len();
        self.engine.set_total(total);
        info!(total, "candidates loaded");

        self.engine
            .run_batch(candidates, protocols, save_invalid)
            .await?;

        let stats = self.engine.stats();
        let report = CycleReport {
            total,
            checked: stats.checked,
            valid: stats.valid,
            started_at,
            elapsed: clock.elapsed(),
        };
        info!(
            total = report.total,
            checked = report.checked,
            valid = report.valid,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "proxy check cycle complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mock::ScriptedTransport;
    use crate::proxy::probe::{ProbeConfig, ProbeExecutor};
    use crate::proxy::store::{ResultStore, RunLogs};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FixedSource(Vec<&'static str>);

    #[async_trait]
    impl CandidateSource for FixedSource {
        async fn candidates(&self) -> Result<Vec<Candidate>> {
            Ok(self.0.iter().map(|c| Candidate::from(*c)).collect())
        }

        fn describe(&self) -> String {
            "fixed list".to_string()
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl CandidateSource for BrokenSource {
        async fn candidates(&self) -> Result<Vec<Candidate>> {
            anyhow::bail!("source offline")
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn controller(dir: &TempDir) -> CycleController {
        let transport = Arc::new(
            ScriptedTransport::fatal()
                .script("1.1.1.1:80", ProtocolKind::Http, vec![Ok(())])
                .script("2.2.2.2:1080", ProtocolKind::Socks5, vec![Ok(())]),
        );
        let engine = ValidationEngine::new(
            ProbeExecutor::with_transport(ProbeConfig::new(), transport),
            ResultStore::new(dir.path().join("proxies.json")),
            RunLogs::new(dir.path().join("valid.txt"), dir.path().join("invalid.txt")),
            4,
        );
        CycleController::new(engine)
    }

    #[tokio::test]
    async fn test_cycle_reports_and_persists() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let source = FixedSource(vec!["1.1.1.1:80", "2.2.2.2:1080", "3.3.3.3:3128"]);

        let report = controller
            .run_cycle(&source, &ProtocolKind::ALL, true)
            .await
            .unwrap();

        assert_eq!((report.total, report.checked, report.valid), (3, 3, 2));

        let stats = controller.engine().stats();
        assert_eq!(stats.total, 3);
        assert!(stats.last_run.is_some());

        let set = controller.engine().store().snapshot().await.unwrap();
        assert_eq!(set.count, 2);
        assert_eq!(set.last_check, Some(report.started_at));
    }

    #[tokio::test]
    async fn test_next_cycle_starts_clean() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        controller
            .run_cycle(&FixedSource(vec!["1.1.1.1:80", "4.4.4.4:8080"]), &ProtocolKind::ALL, true)
            .await
            .unwrap();
        let report = controller
            .run_cycle(&FixedSource(vec!["5.5.5.5:8080"]), &ProtocolKind::ALL, true)
            .await
            .unwrap();

        assert_eq!((report.total, report.checked, report.valid), (1, 1, 0));
        assert_eq!(controller.engine().store().snapshot().await.unwrap().count, 0);

        let logs = controller.engine().logs();
        assert_eq!(std::fs::read_to_string(logs.valid_path()).unwrap(), "");
        assert_eq!(
            std::fs::read_to_string(logs.invalid_path()).unwrap(),
            "5.5.5.5:8080\n"
        );
    }

    #[tokio::test]
    async fn test_source_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        let err = controller
            .run_cycle(&BrokenSource, &ProtocolKind::ALL, false)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("source offline"));
        assert_eq!(controller.engine().store().snapshot().await.unwrap().count, 0);
    }
}
