//! Telemetry sync: pushes records to a sink without ever blocking the agent.
//!
//! Event-triggered records go through a bounded queue (full queue = record
//! dropped). A periodic push of cumulative counters repairs anything lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grindclaw_core::error::{GrindClawError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::history::HistoryStore;
use crate::record::TelemetryRecord;

/// Destination for telemetry records.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &str;
    async fn push(&self, record: &TelemetryRecord) -> Result<()>;
}

/// POSTs records as JSON to a remote gateway's ingest endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    pairing_code: Option<String>,
}

impl HttpSink {
    pub fn new(endpoint: &str, pairing_code: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GrindClawError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            pairing_code: pairing_code.filter(|c| !c.is_empty()),
        })
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn push(&self, record: &TelemetryRecord) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(record);
        if let Some(code) = &self.pairing_code {
            request = request.header("X-Pairing-Code", code);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GrindClawError::Telemetry(format!("push to {} failed: {e}", self.endpoint)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GrindClawError::Telemetry(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Feeds records straight into an in-process store.
pub struct StoreSink {
    store: Arc<HistoryStore>,
}

impl StoreSink {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TelemetrySink for StoreSink {
    fn name(&self) -> &str {
        "store"
    }

    async fn push(&self, record: &TelemetryRecord) -> Result<()> {
        self.store.ingest(record);
        Ok(())
    }
}

/// Handle used by the agent to enqueue telemetry. Cheap to clone.
#[derive(Clone)]
pub struct TelemetrySync {
    tx: mpsc::Sender<TelemetryRecord>,
}

impl TelemetrySync {
    /// Start the push loop.
    ///
    /// `periodic` builds the counters record pushed every `interval`; it is
    /// also pushed once more on cancellation.
    pub fn spawn<F>(
        sink: Arc<dyn TelemetrySink>,
        interval: Duration,
        queue_size: usize,
        periodic: F,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>)
    where
        F: Fn() -> TelemetryRecord + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<TelemetryRecord>(queue_size.max(1));

        let handle = tokio::spawn(async move {
            tracing::info!("📡 Telemetry sync started (sink: {}, every {:?})", sink.name(), interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        while let Ok(record) = rx.try_recv() {
                            push(sink.as_ref(), &record).await;
                        }
                        push(sink.as_ref(), &periodic()).await;
                        break;
                    }
                    Some(record) = rx.recv() => push(sink.as_ref(), &record).await,
                    _ = ticker.tick() => push(sink.as_ref(), &periodic()).await,
                }
            }
            tracing::info!("📡 Telemetry sync stopped");
        });

        (Self { tx }, handle)
    }

    /// Enqueue a record. Never waits; drops the record when the queue is full.
    pub fn record(&self, record: TelemetryRecord) {
        if let Err(e) = self.tx.try_send(record) {
            tracing::debug!("Telemetry record dropped: {e}");
        }
    }
}

async fn push(sink: &dyn TelemetrySink, record: &TelemetryRecord) {
    if let Err(e) = sink.push(record).await {
        tracing::warn!("⚠️ Telemetry push failed: {e}");
    }
}
