//! Pipeline telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a READ-ONLY side-effect layer.
//! It must **NEVER** be read inside decision logic (Resolver, Dispatcher, Store).
//! It exists solely for observability and verification.
//!
//! # PRIVACY INVARIANT
//! Telemetry events must **NEVER** contain user content (utterance text, slot values).
//! Only closed enums (intent, slot, phase, error kind) and metrics (latency, counts)
//! are allowed. Conversation ids stay in the tracing logs, not here.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::{DispatchOutcome, StateResetCause, TelemetryEvent};
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;
