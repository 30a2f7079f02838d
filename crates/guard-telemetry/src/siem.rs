//! SIEM event delivery: bounded queue, batching, and a background drainer.
//!
//! ## Contract
//!
//! - The guard path only ever calls [`SiemManager::enqueue_finding`], which
//!   takes a mutex for a queue push and returns immediately. A full queue
//!   returns `false` (backpressure) - it never blocks and never drops
//!   silently on the hot path.
//! - A background task drains the queue every `flush_interval` and whenever
//!   a batch fills, handing batches to the configured [`SiemConnector`].
//! - Delivery failures are counted and logged; they never propagate back
//!   into the pipeline.
//!
//! Concrete Splunk/Elastic/Webhook connectors live with the transport and
//! are out of scope here; [`TracingConnector`] ships as the default sink
//! and the trait is the integration seam.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Hard cap on queued events; enqueueing beyond it is refused.
pub const MAX_QUEUE_SIZE: usize = 10_000;

/// Errors surfaced by SIEM connectors.
#[derive(Debug, Error)]
pub enum SiemError {
    #[error("connector send failed: {0}")]
    Send(String),

    #[error("connector unavailable: {0}")]
    Unavailable(String),
}

/// Supported connector families. Implementations beyond the tracing sink
/// are supplied by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Splunk,
    Elasticsearch,
    Webhook,
    None,
}

impl std::str::FromStr for ConnectorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "splunk" => Ok(ConnectorType::Splunk),
            "elasticsearch" => Ok(ConnectorType::Elasticsearch),
            "webhook" => Ok(ConnectorType::Webhook),
            "none" | "" => Ok(ConnectorType::None),
            other => Err(format!("unknown SIEM connector type: {other}")),
        }
    }
}

/// SIEM integration configuration, read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiemConfig {
    pub enabled: bool,
    pub connector_type: ConnectorType,
    /// Events batched before an eager flush.
    pub batch_size: usize,
    /// Seconds between timer-driven flushes.
    pub flush_interval_secs: f64,
    pub retry_count: u32,
    pub retry_delay_secs: f64,
    pub timeout_secs: f64,
}

impl Default for SiemConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connector_type: ConnectorType::None,
            batch_size: 10,
            flush_interval_secs: 5.0,
            retry_count: 3,
            retry_delay_secs: 1.0,
            timeout_secs: 10.0,
        }
    }
}

impl SiemConfig {
    /// Read configuration from `SIEM_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("SIEM_ENABLED", defaults.enabled),
            connector_type: std::env::var("SIEM_CONNECTOR_TYPE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connector_type),
            batch_size: env_parse("SIEM_BATCH_SIZE", defaults.batch_size).clamp(1, 1000),
            flush_interval_secs: env_parse("SIEM_FLUSH_INTERVAL", defaults.flush_interval_secs)
                .max(0.1),
            retry_count: env_parse("SIEM_RETRY_COUNT", defaults.retry_count).min(10),
            retry_delay_secs: env_parse("SIEM_RETRY_DELAY", defaults.retry_delay_secs).max(0.1),
            timeout_secs: env_parse("SIEM_TIMEOUT", defaults.timeout_secs).max(1.0),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// One security event shipped to the SIEM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiemEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub rule_id: String,
    pub action: String,
    pub severity: String,
    pub request_id: Option<String>,
    pub tenant: Option<String>,
    pub risk_score: i64,
    /// `sha256:<hex>` of the matched snippet; never the raw value.
    pub snippet_hash: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SiemEvent {
    /// Build a `finding` event.
    #[allow(clippy::too_many_arguments)]
    pub fn finding(
        rule_id: impl Into<String>,
        action: impl Into<String>,
        severity: impl Into<String>,
        request_id: Option<String>,
        tenant: Option<String>,
        risk_score: i64,
        snippet_hash: Option<String>,
        blocked: bool,
    ) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("blocked".to_string(), serde_json::Value::from(blocked));
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: "finding".to_string(),
            rule_id: rule_id.into(),
            action: action.into(),
            severity: severity.into(),
            request_id,
            tenant,
            risk_score,
            snippet_hash,
            metadata,
        }
    }
}

/// Delivery seam for SIEM backends.
#[async_trait]
pub trait SiemConnector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver one batch. An `Err` counts the whole batch as failed.
    async fn send_events(&self, events: &[SiemEvent]) -> Result<(), SiemError>;
}

/// Default sink: emits batches as structured log events. Useful on its own
/// for log-forwarder setups and as the test double.
#[derive(Debug, Default)]
pub struct TracingConnector;

#[async_trait]
impl SiemConnector for TracingConnector {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn send_events(&self, events: &[SiemEvent]) -> Result<(), SiemError> {
        for event in events {
            info!(
                target: "siem",
                event_type = %event.event_type,
                rule_id = %event.rule_id,
                action = %event.action,
                severity = %event.severity,
                risk_score = event.risk_score,
                "siem event"
            );
        }
        Ok(())
    }
}

/// Delivery counters, updated with atomics so readers never contend with
/// the guard path.
#[derive(Debug, Default)]
pub struct SiemStats {
    pub events_queued: AtomicU64,
    pub events_sent: AtomicU64,
    pub events_failed: AtomicU64,
    pub batches_sent: AtomicU64,
    pub batches_failed: AtomicU64,
}

impl SiemStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "events_queued": self.events_queued.load(Ordering::Relaxed),
            "events_sent": self.events_sent.load(Ordering::Relaxed),
            "events_failed": self.events_failed.load(Ordering::Relaxed),
            "batches_sent": self.batches_sent.load(Ordering::Relaxed),
            "batches_failed": self.batches_failed.load(Ordering::Relaxed),
        })
    }
}

/// Manages SIEM event delivery with batching and a background flush task.
pub struct SiemManager {
    config: SiemConfig,
    queue: Mutex<VecDeque<SiemEvent>>,
    connector: Option<Arc<dyn SiemConnector>>,
    notify: Notify,
    running: AtomicBool,
    pub stats: SiemStats,
}

impl SiemManager {
    /// Create a manager with the tracing connector (when enabled).
    pub fn new(config: SiemConfig) -> Self {
        let connector: Option<Arc<dyn SiemConnector>> = if config.enabled {
            Some(Arc::new(TracingConnector))
        } else {
            None
        };
        Self::with_connector(config, connector)
    }

    /// Create a manager with an explicit connector.
    pub fn with_connector(config: SiemConfig, connector: Option<Arc<dyn SiemConnector>>) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            connector,
            notify: Notify::new(),
            running: AtomicBool::new(false),
            stats: SiemStats::default(),
        }
    }

    /// Current queue depth.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().expect("siem queue lock poisoned").len()
    }

    /// Queue a finding event.
    ///
    /// Returns `true` when accepted (including the no-op case of a
    /// disabled manager) and `false` on backpressure.
    pub fn enqueue(&self, event: SiemEvent) -> bool {
        if !self.config.enabled || self.connector.is_none() {
            return true;
        }
        {
            let mut queue = self.queue.lock().expect("siem queue lock poisoned");
            if queue.len() >= MAX_QUEUE_SIZE {
                warn!(queue_size = queue.len(), "siem queue full");
                return false;
            }
            queue.push_back(event);
            self.stats.events_queued.fetch_add(1, Ordering::Relaxed);
            if queue.len() < self.config.batch_size {
                return true;
            }
        }
        // Batch filled: wake the drainer without blocking the caller.
        self.notify.notify_one();
        true
    }

    /// Start the background flush loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled || self.connector.is_none() {
            info!("siem disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let interval = Duration::from_secs_f64(manager.config.flush_interval_secs);
            info!(
                connector = manager.connector.as_ref().map(|c| c.name()).unwrap_or("none"),
                batch_size = manager.config.batch_size,
                flush_interval = manager.config.flush_interval_secs,
                "siem started"
            );
            while manager.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = manager.notify.notified() => {}
                }
                manager.flush().await;
            }
            // Final drain on shutdown.
            manager.flush().await;
            info!(stats = %manager.stats.snapshot(), "siem stopped");
        });
    }

    /// Stop the background loop and let it drain once more.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Drain up to `batch_size` events per batch until the queue is empty.
    pub async fn flush(&self) {
        let Some(connector) = self.connector.as_ref() else {
            return;
        };
        loop {
            let batch: Vec<SiemEvent> = {
                let mut queue = self.queue.lock().expect("siem queue lock poisoned");
                let take = queue.len().min(self.config.batch_size);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                return;
            }
            match connector.send_events(&batch).await {
                Ok(()) => {
                    self.stats
                        .events_sent
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(batch = batch.len(), "siem batch delivered");
                }
                Err(err) => {
                    self.stats
                        .events_failed
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                    error!(%err, batch = batch.len(), "siem batch delivery failed");
                }
            }
        }
    }
}

static GLOBAL_MANAGER: std::sync::LazyLock<Arc<SiemManager>> =
    std::sync::LazyLock::new(|| Arc::new(SiemManager::new(SiemConfig::from_env())));

/// The process-wide manager, configured from the environment on first use.
pub fn global() -> &'static Arc<SiemManager> {
    &GLOBAL_MANAGER
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingConnector {
        sent: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl SiemConnector for CountingConnector {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn send_events(&self, events: &[SiemEvent]) -> Result<(), SiemError> {
            if self.fail {
                return Err(SiemError::Send("boom".to_string()));
            }
            self.sent.fetch_add(events.len() as u64, Ordering::Relaxed);
            Ok(())
        }
    }

    fn event(rule_id: &str) -> SiemEvent {
        SiemEvent::finding(rule_id, "block", "high", None, None, 50, None, true)
    }

    fn enabled_config() -> SiemConfig {
        SiemConfig {
            enabled: true,
            connector_type: ConnectorType::Webhook,
            batch_size: 4,
            ..SiemConfig::default()
        }
    }

    #[test]
    fn disabled_manager_accepts_silently() {
        let manager = SiemManager::new(SiemConfig::default());
        assert!(manager.enqueue(event("R1")));
        assert_eq!(manager.queue_len(), 0);
    }

    #[test]
    fn backpressure_when_queue_is_full() {
        let connector = Arc::new(CountingConnector { sent: AtomicU64::new(0), fail: false });
        let manager = SiemManager::with_connector(enabled_config(), Some(connector));
        for _ in 0..MAX_QUEUE_SIZE {
            // Fill directly; no drainer is running.
            manager
                .queue
                .lock()
                .unwrap()
                .push_back(event("R1"));
        }
        assert!(!manager.enqueue(event("R2")));
    }

    #[tokio::test]
    async fn flush_delivers_in_batches() {
        let connector = Arc::new(CountingConnector { sent: AtomicU64::new(0), fail: false });
        let manager =
            SiemManager::with_connector(enabled_config(), Some(Arc::clone(&connector) as _));
        for i in 0..10 {
            assert!(manager.enqueue(event(&format!("R{i}"))));
        }
        manager.flush().await;
        assert_eq!(connector.sent.load(Ordering::Relaxed), 10);
        assert_eq!(manager.queue_len(), 0);
        assert_eq!(manager.stats.batches_sent.load(Ordering::Relaxed), 3); // 4 + 4 + 2
    }

    #[tokio::test]
    async fn failed_batches_are_counted_not_retried_inline() {
        let connector = Arc::new(CountingConnector { sent: AtomicU64::new(0), fail: true });
        let manager =
            SiemManager::with_connector(enabled_config(), Some(Arc::clone(&connector) as _));
        for _ in 0..3 {
            manager.enqueue(event("R1"));
        }
        manager.flush().await;
        assert_eq!(manager.stats.events_failed.load(Ordering::Relaxed), 3);
        assert_eq!(manager.stats.batches_failed.load(Ordering::Relaxed), 1);
        assert_eq!(manager.queue_len(), 0);
    }

    #[tokio::test]
    async fn background_loop_drains_on_batch_trigger() {
        let connector = Arc::new(CountingConnector { sent: AtomicU64::new(0), fail: false });
        let manager = Arc::new(SiemManager::with_connector(
            SiemConfig { flush_interval_secs: 30.0, ..enabled_config() },
            Some(Arc::clone(&connector) as _),
        ));
        manager.start();
        for i in 0..4 {
            manager.enqueue(event(&format!("R{i}")));
        }
        // The batch trigger wakes the drainer well before the 30s timer.
        for _ in 0..50 {
            if connector.sent.load(Ordering::Relaxed) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.sent.load(Ordering::Relaxed), 4);
        manager.stop();
    }

    #[test]
    fn connector_type_parses_known_names() {
        assert_eq!("splunk".parse::<ConnectorType>().unwrap(), ConnectorType::Splunk);
        assert_eq!("WEBHOOK".parse::<ConnectorType>().unwrap(), ConnectorType::Webhook);
        assert!("carrier-pigeon".parse::<ConnectorType>().is_err());
    }

    #[test]
    fn finding_event_carries_blocked_flag() {
        let e = SiemEvent::finding("R1", "block", "high", None, None, 80, None, true);
        assert_eq!(e.metadata["blocked"], serde_json::Value::Bool(true));
        assert_eq!(e.event_type, "finding");
    }
}
