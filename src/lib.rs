//! Log Forwarder Library
//!
//! This library batches log lines into size- and time-bounded buffers and
//! delivers each buffer to a pluggable destination:
//!
//! - **buffer**: Bounded byte accumulator of newline-joined lines
//! - **batch**: Async batcher with size and time-based seal triggers
//! - **forward**: Forwarder trait, forwarding loop, HTTP/file/stdout destinations
//! - **diagnostics**: Sink for dropped lines and failed deliveries
//! - **metadata**: Log-event context and EC2 instance metadata lookup
//! - **config**: Environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use log_forwarder::batch::{BatchConfig, Batcher};
//! use log_forwarder::forward::{forward, HttpConfig, HttpForwarder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let forwarder = HttpForwarder::new("api key", HttpConfig::default())
//!         .expect("Failed to create forwarder");
//!
//!     let (sender, batcher) = Batcher::spawn(BatchConfig::default());
//!     let (buffers, _task) = batcher.into_parts();
//!
//!     tokio::spawn(async move {
//!         sender.send("a log line").await.ok();
//!         // Dropping the sender flushes the last buffer
//!     });
//!
//!     forward(buffers, &forwarder).await;
//! }
//! ```

// Module declarations
pub mod batch;
pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod forward;
pub mod metadata;

// Re-export commonly used types at crate root for convenience
pub use batch::{BatchConfig, BatchError, BatchSender, BatchStats, Batcher};
pub use buffer::{Append, Buffer};
pub use config::{Config, ConfigError, DestinationKind};
pub use diagnostics::{Diagnostic, Diagnostics, RecordingDiagnostics, TracingDiagnostics};
pub use forward::{
    forward, Destination, FileForwarder, ForwardError, Forwarder, HttpConfig, HttpForwarder,
    RetryPolicy, StdoutForwarder,
};
pub use metadata::{Ec2Client, LogEvent};
