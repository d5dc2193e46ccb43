//! TCP reachability probes with debounce and failure backoff.
//!
//! # Responsibilities
//! - Answer "is host:port reachable" for routing rules and side channels
//! - Avoid reconnecting more often than the configured interval
//! - Stop probing for a while after repeated consecutive failures
//!
//! # State Machine
//! ```text
//! NoCheckYet ──connect ok──▶ Success ◀──┐
//!      │                       │        │ connect ok (failures reset)
//!      └──connect err──▶ Failure ───────┘
//!                          │
//!                          └─ failures >= threshold: cached Failure is
//!                             returned until disable_duration has elapsed
//!                             since the last attempt
//! ```
//!
//! # Design Decisions
//! - One probe per distinct parameter tuple, shared across callers, so that
//!   failure counters persist between rule evaluations
//! - The per-probe lock is held across the connect; concurrent callers of the
//!   same probe wait for the in-flight attempt instead of starting their own
//! - The debounce clock records attempts, not successes

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::ProbeError;
use crate::observability::metrics;

/// Identity of a probe. Equal tuples share one probe state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeKey {
    pub host: String,
    pub port: u16,
    /// Minimum time between two connection attempts.
    pub check_interval_ms: u64,
    /// Consecutive failures before the probe backs off.
    pub fail_threshold: u32,
    /// How long to back off once the threshold is reached.
    pub disable_duration_secs: u64,
}

impl ProbeKey {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        check_interval_ms: u64,
        fail_threshold: u32,
        disable_duration_secs: u64,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            check_interval_ms,
            fail_threshold,
            disable_duration_secs,
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeResult {
    #[default]
    NoCheckYet,
    Success,
    Failure,
}

/// Opens (and immediately closes) a TCP connection.
#[async_trait]
pub trait TcpConnector: Send + Sync + fmt::Debug {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ProbeError>;
}

/// Real connector backed by `tokio::net::TcpStream`.
#[derive(Debug, Clone)]
pub struct TokioConnector {
    timeout: Duration,
}

impl TokioConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl TcpConnector for TokioConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        let target = format!("{host}:{port}");
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(source)) => Err(ProbeError::Connect { target, source }),
            Err(_) => Err(ProbeError::Timeout { target }),
        }
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    last_check: Option<Instant>,
    last_result: ProbeResult,
    consecutive_failures: u32,
}

impl ProbeState {
    fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.last_check.map(|t| now.saturating_duration_since(t))
    }

    fn is_disabled(&self, key: &ProbeKey, now: Instant) -> bool {
        if self.consecutive_failures < key.fail_threshold {
            return false;
        }
        self.elapsed(now)
            .is_some_and(|e| e < Duration::from_secs(key.disable_duration_secs))
    }

    fn is_check_due(&self, key: &ProbeKey, now: Instant) -> bool {
        self.elapsed(now)
            .map_or(true, |e| e > Duration::from_millis(key.check_interval_ms))
    }
}

/// Debounced TCP probe for one parameter tuple.
pub struct ConnectionProbe {
    key: ProbeKey,
    connector: Arc<dyn TcpConnector>,
    state: Mutex<ProbeState>,
}

impl fmt::Debug for ConnectionProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProbe").field("key", &self.key).finish()
    }
}

impl ConnectionProbe {
    pub fn new(key: ProbeKey, connector: Arc<dyn TcpConnector>) -> Self {
        Self {
            key,
            connector,
            state: Mutex::new(ProbeState::default()),
        }
    }

    pub fn key(&self) -> &ProbeKey {
        &self.key
    }

    /// Probe the target unless backed off or debounced, in which case the
    /// cached result is returned.
    pub async fn check(&self) -> ProbeResult {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if state.is_disabled(&self.key, now) {
            tracing::debug!(
                addr = %self.key.target(),
                failures = state.consecutive_failures,
                "Probe backed off after repeated failures"
            );
            return state.last_result;
        }

        if !state.is_check_due(&self.key, now) {
            return state.last_result;
        }

        state.last_check = Some(now);
        let target = self.key.target();
        match self.connector.connect(&self.key.host, self.key.port).await {
            Ok(()) => {
                tracing::debug!(addr = %target, "TCP probe succeeded");
                state.consecutive_failures = 0;
                state.last_result = ProbeResult::Success;
            }
            Err(e) => {
                state.consecutive_failures += 1;
                tracing::warn!(
                    addr = %target,
                    error = %e,
                    failures = state.consecutive_failures,
                    "TCP probe failed"
                );
                state.last_result = ProbeResult::Failure;
            }
        }
        metrics::record_tcp_probe(&target, state.last_result == ProbeResult::Success);

        state.last_result
    }

    pub async fn last_result(&self) -> ProbeResult {
        self.state.lock().await.last_result
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }
}

/// Registry of probes keyed by parameter tuple.
#[derive(Debug)]
pub struct ConnectionChecker {
    probes: DashMap<ProbeKey, Arc<ConnectionProbe>>,
    connector: Arc<dyn TcpConnector>,
}

impl Default for ConnectionChecker {
    fn default() -> Self {
        Self::new(Arc::new(TokioConnector::default()))
    }
}

impl ConnectionChecker {
    pub fn new(connector: Arc<dyn TcpConnector>) -> Self {
        Self {
            probes: DashMap::new(),
            connector,
        }
    }

    /// The shared probe for `key`, created on first use.
    pub fn probe(&self, key: ProbeKey) -> Arc<ConnectionProbe> {
        let connector = self.connector.clone();
        self.probes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ConnectionProbe::new(key, connector)))
            .value()
            .clone()
    }

    /// `true` when the (possibly cached) result for this tuple is a success.
    pub async fn tcp_check(
        &self,
        host: &str,
        port: u16,
        check_interval_ms: u64,
        fail_threshold: u32,
        disable_duration_secs: u64,
    ) -> bool {
        let key = ProbeKey::new(host, port, check_interval_ms, fail_threshold, disable_duration_secs);
        self.probe(key).check().await == ProbeResult::Success
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}
