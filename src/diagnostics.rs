//! Diagnostic sink for pipeline failures.
//!
//! Nothing in the pipeline returns delivery-time errors to the producer. Instead,
//! components report what went wrong to a [`Diagnostics`] sink and keep going.
//! The default sink turns each report into a `tracing` event.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

/// A single reportable condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A unit larger than a whole buffer was dropped.
    OversizedUnit { len: usize, capacity: usize },

    /// The destination answered with a status outside the success range.
    UnexpectedResponse { status: u16 },

    /// The transport call failed, including after retries ran out.
    DeliveryFailed { destination: String, error: String },

    /// Writing or flushing a local destination failed.
    WriteFailed { destination: String, error: String },

    /// A metadata field could not be looked up.
    MetadataUnavailable { field: String, error: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::OversizedUnit { len, capacity } => write!(
                f,
                "Dropping log line of {len} bytes, greater than the max buffer size ({capacity})"
            ),
            Diagnostic::UnexpectedResponse { status } => {
                write!(f, "HTTPForwarder: unexpected response (status code {})", status)
            }
            Diagnostic::DeliveryFailed { destination, error } => {
                write!(f, "Failed to deliver buffer to {}: {}", destination, error)
            }
            Diagnostic::WriteFailed { destination, error } => {
                write!(f, "Failed to write buffer to {}: {}", destination, error)
            }
            Diagnostic::MetadataUnavailable { field, error } => {
                write!(f, "Could not determine {field} from metadata service: {error}")
            }
        }
    }
}

/// Receiver of diagnostics.
///
/// Implementations must not block and must not panic.
pub trait Diagnostics: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Shared handle to a diagnostics sink.
pub type SharedDiagnostics = Arc<dyn Diagnostics>;

/// Default sink: forwards every diagnostic to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::OversizedUnit { len, capacity } => {
                warn!(len = *len, capacity = *capacity, "{}", diagnostic);
            }
            Diagnostic::UnexpectedResponse { status } => {
                error!(status = *status, "{}", diagnostic);
            }
            Diagnostic::DeliveryFailed { destination, .. }
            | Diagnostic::WriteFailed { destination, .. } => {
                error!(destination = %destination, "{}", diagnostic);
            }
            Diagnostic::MetadataUnavailable { field, error } => {
                warn!(field = %field, error = %error, "{}", diagnostic);
            }
        }
    }
}

/// Returns the default tracing-backed sink.
pub fn default_diagnostics() -> SharedDiagnostics {
    Arc::new(TracingDiagnostics)
}

/// Sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    records: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.records
            .lock()
            .map(|records| records.is_empty())
            .unwrap_or(true)
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        if let Ok(mut records) = self.records.lock() {
            records.push(diagnostic);
        }
    }
}
