//! Probe executor: multi-protocol fallback probing of a single candidate

use crate::error::AttemptError;
use crate::proxy::models::{Candidate, ProbeOutcome, ProtocolKind};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single probe attempt in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 2;

/// Default number of attempts per protocol
const DEFAULT_RETRIES: u32 = 2;

/// Default pause after a transient failure in milliseconds
const DEFAULT_BACKOFF_MS: u64 = 50;

/// Default echo endpoint fetched through the proxy
pub const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Configuration for probing
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout for each attempt
    pub timeout: Duration,
    /// Attempts per protocol, at least one
    pub retries: u32,
    /// Pause between attempts after a transient failure
    pub backoff: Duration,
    /// URL to fetch through the proxy
    pub test_url: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }
}

/// One request routed through a candidate proxy.
///
/// `Ok(())` means the proxy returned 200 OK for the echo request.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn attempt(
        &self,
        candidate: &Candidate,
        protocol: ProtocolKind,
        timeout: Duration,
    ) -> Result<(), AttemptError>;
}

/// Transport issuing a real HTTP GET through the proxy with reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    test_url: String,
}

impl HttpTransport {
    pub fn new(test_url: impl Into<String>) -> Self {
        Self {
            test_url: test_url.into(),
        }
    }

    /// Create a short-lived client routing every scheme through the candidate
    fn create_client(
        candidate: &Candidate,
        protocol: ProtocolKind,
        timeout: Duration,
    ) -> reqwest::Result<Client> {
        let proxy = ReqwestProxy::all(candidate.url(protocol))?;

        Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn attempt(
        &self,
        candidate: &Candidate,
        protocol: ProtocolKind,
        timeout: Duration,
    ) -> Result<(), AttemptError> {
        let client = Self::create_client(candidate, protocol, timeout)
            .map_err(|e| AttemptError::fatal(e.to_string()))?;

        match tokio::time::timeout(timeout, client.get(&self.test_url).send()).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => Ok(()),
            Ok(Ok(response)) => Err(AttemptError::Rejected(response.status().as_u16())),
            Ok(Err(e)) => Err(classify(&e)),
            Err(_) => Err(AttemptError::transient("timed out")),
        }
    }
}

/// Split reqwest failures into ones worth retrying and ones that are not
fn classify(error: &reqwest::Error) -> AttemptError {
    if error.is_timeout() || error.is_connect() {
        return AttemptError::transient(error.to_string());
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_error.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            ) {
                return AttemptError::transient(error.to_string());
            }
        }
        source = cause.source();
    }

    AttemptError::fatal(error.to_string())
}

/// Per-candidate probing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    /// Attempt number `attempt` (1-based) of `protocols[index]`
    Trying { index: usize, attempt: u32 },
    Succeeded(ProtocolKind),
    Exhausted,
}

/// Runs the protocol-fallback state machine for candidates.
///
/// Holds no shared mutable state, so one executor can probe any number of
/// distinct candidates concurrently.
#[derive(Clone)]
pub struct ProbeExecutor {
    config: ProbeConfig,
    transport: Arc<dyn ProbeTransport>,
}

impl ProbeExecutor {
    /// Create an executor that probes over real HTTP
    pub fn new(config: ProbeConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.test_url.clone()));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ProbeConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe `candidate` with each protocol in order until one works.
    ///
    /// Returns exactly one outcome; the first protocol that succeeds wins and
    /// later ones are never tried.
    pub async fn probe(&self, candidate: &Candidate, protocols: &[ProtocolKind]) -> ProbeOutcome {
        let retries = self.config.retries.max(1);
        let mut state = ProbeState::Trying {
            index: 0,
            attempt: 1,
        };

        loop {
            state = match state {
                ProbeState::Trying { index, attempt } => match protocols.get(index) {
                    Some(&protocol) => self.step(candidate, protocol, index, attempt, retries).await,
                    None => ProbeState::Exhausted,
                },
                ProbeState::Succeeded(protocol) => {
                    return ProbeOutcome::valid(candidate.clone(), protocol);
                }
                ProbeState::Exhausted => return ProbeOutcome::invalid(candidate.clone()),
            };
        }
    }

    async fn step(
        &self,
        candidate: &Candidate,
        protocol: ProtocolKind,
        index: usize,
        attempt: u32,
        retries: u32,
    ) -> ProbeState {
        let next_protocol = ProbeState::Trying {
            index: index + 1,
            attempt: 1,
        };

        match self
            .transport
            .attempt(candidate, protocol, self.config.timeout)
            .await
        {
            Ok(()) => ProbeState::Succeeded(protocol),
            Err(e) if e.is_retryable() && attempt < retries => {
                debug!(%candidate, %protocol, attempt, error = %e, "probe attempt failed, retrying");
                if e.wants_backoff() {
                    tokio::time::sleep(self.config.backoff).await;
                }
                ProbeState::Trying {
                    index,
                    attempt: attempt + 1,
                }
            }
            Err(e) => {
                debug!(%candidate, %protocol, attempt, error = %e, "giving up on protocol");
                next_protocol
            }
        }
    }
}
