//! Scripted probe transport for tests

use crate::error::AttemptError;
use crate::proxy::models::{Candidate, ProtocolKind};
use crate::proxy::probe::ProbeTransport;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Script = VecDeque<Result<(), AttemptError>>;

/// Replays scripted attempt results per (candidate, protocol).
///
/// Unscripted attempts return the fallback result. Tracks how many attempts
/// are in flight at once.
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, ProtocolKind), Script>>,
    fallback: Result<(), AttemptError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, ProtocolKind)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    fn with_fallback(fallback: Result<(), AttemptError>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every unscripted attempt is refused
    pub(crate) fn failing() -> Self {
        Self::with_fallback(Err(AttemptError::transient("connection refused")))
    }

    /// Every unscripted attempt fails without retry
    pub(crate) fn fatal() -> Self {
        Self::with_fallback(Err(AttemptError::fatal("unexpected response")))
    }

    /// Every unscripted attempt succeeds
    pub(crate) fn succeeding() -> Self {
        Self::with_fallback(Ok(()))
    }

    pub(crate) fn script(
        self,
        candidate: &str,
        protocol: ProtocolKind,
        results: Vec<Result<(), AttemptError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert((candidate.to_string(), protocol), results.into());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, ProtocolKind)> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of attempts observed in flight at once
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn attempt(
        &self,
        candidate: &Candidate,
        protocol: ProtocolKind,
        _timeout: Duration,
    ) -> Result<(), AttemptError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        self.calls
            .lock()
            .unwrap()
            .push((candidate.to_string(), protocol));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(candidate.to_string(), protocol))
            .and_then(|script| script.pop_front());

        self.active.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
