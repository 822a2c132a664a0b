//! # GrindClaw Telemetry
//!
//! Everything the dashboard sees flows through this crate.
//!
//! ```text
//! Agent (scheduler + classifier)
//!   └── TelemetrySync.record(TelemetryRecord)      best-effort, bounded queue
//!         ├── periodic push (every 5s)             cumulative counters
//!         └── sink
//!               ├── HttpSink  → POST /api/v1/telemetry on a remote gateway
//!               └── StoreSink → HistoryStore (in-process gateway)
//!
//! HistoryStore (one mutex)
//!   ├── samples: 50 time buckets, FIFO
//!   ├── events:  10 formatted lines, FIFO
//!   └── snapshot() → counters + rate/efficiency/uptime + buffer copies
//!
//! PredictionEngine (pure) ← snapshot.resource_history()
//! ```

pub mod history;
pub mod predict;
pub mod record;
pub mod sync;

pub use history::{BoundedLog, HistorySample, HistoryStore, SampleDelta, TelemetrySnapshot};
pub use predict::{Estimator, Forecast, PeakPrediction, Prediction, PredictionEngine};
pub use record::{CounterIncrements, TelemetryRecord};
pub use sync::{HttpSink, StoreSink, TelemetrySink, TelemetrySync};
