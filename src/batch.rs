//! Batching of log lines into size- and time-bounded buffers.
//!
//! The batcher runs as a single tokio task driven by two event sources
//! using `select!`: units arriving on the input channel and a periodic
//! timer. A buffer is sealed and emitted when:
//! - the next unit would overflow it (size-based seal)
//! - the period elapses while it holds data (time-based seal)
//! - the input channel closes while it holds data (final seal)
//!
//! Emitting a sealed buffer is a handoff: the batcher waits until the
//! consumer has taken it, so a slow consumer stalls the batcher instead of
//! letting sealed buffers pile up in memory.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::{Append, Buffer};
use crate::diagnostics::{default_diagnostics, Diagnostic, SharedDiagnostics};

/// Default buffer capacity. Payloads over 1MB are refused by the intake API,
/// this leaves 10kb for headers.
pub const DEFAULT_CAPACITY: usize = 990_000;

/// Default maximum age of a non-empty buffer.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(3);

/// Default capacity of the input channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// tokio has no zero-capacity channel. `emit` waits for this slot to be
/// drained again, which turns it into a rendezvous.
const OUTPUT_CHANNEL_CAPACITY: usize = 1;

/// Batching policy.
///
/// Zero-valued fields and a missing diagnostics sink are replaced with the
/// defaults by [`BatchConfig::with_defaults`].
#[derive(Clone)]
pub struct BatchConfig {
    /// Maximum time a non-empty buffer stays unsealed
    pub period: Duration,

    /// Maximum buffer size in bytes
    pub capacity: usize,

    /// Capacity of the input channel
    pub channel_capacity: usize,

    /// Where dropped units are reported
    pub diagnostics: Option<SharedDiagnostics>,
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("period", &self.period)
            .field("capacity", &self.capacity)
            .field("channel_capacity", &self.channel_capacity)
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            capacity: DEFAULT_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            diagnostics: Some(default_diagnostics()),
        }
    }
}

impl BatchConfig {
    /// Create a config with the given period and capacity, defaults elsewhere.
    pub fn new(period: Duration, capacity: usize) -> Self {
        Self {
            period,
            capacity,
            ..Self::default()
        }
    }

    /// A config where every field is unset.
    pub fn unset() -> Self {
        Self {
            period: Duration::ZERO,
            capacity: 0,
            channel_capacity: 0,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Fill unset fields from [`BatchConfig::default`].
    pub fn with_defaults(self) -> Self {
        apply_defaults(self, Self::default())
    }
}

/// Overlay `defaults` onto every unset field of `partial`.
pub fn apply_defaults(partial: BatchConfig, defaults: BatchConfig) -> BatchConfig {
    BatchConfig {
        period: if partial.period.is_zero() {
            defaults.period
        } else {
            partial.period
        },
        capacity: if partial.capacity == 0 {
            defaults.capacity
        } else {
            partial.capacity
        },
        channel_capacity: if partial.channel_capacity == 0 {
            defaults.channel_capacity
        } else {
            partial.channel_capacity
        },
        diagnostics: partial.diagnostics.or(defaults.diagnostics),
    }
}

/// Counters collected over the life of a batcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Units taken off the input channel, including dropped ones
    pub units_received: u64,

    /// Units dropped for being larger than a buffer
    pub units_dropped: u64,

    /// Total bytes handed to the output channel
    pub bytes_sealed: u64,

    /// Seals caused by a unit that did not fit
    pub size_seals: u64,

    /// Seals caused by the period elapsing
    pub timer_seals: u64,

    /// Seals caused by the input channel closing
    pub close_seals: u64,
}

/// Errors returned by [`BatchSender`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    /// The input channel is full (for non-blocking sends)
    #[error("batcher input channel is full")]
    Full,

    /// The batcher has stopped and no longer accepts units
    #[error("batcher has been closed")]
    Closed,
}

/// Handle for submitting units to a batcher.
///
/// Cloneable. The batcher sees its input as closed once every clone is dropped.
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Bytes>,
}

impl BatchSender {
    /// Submit a unit, waiting while the input channel is full.
    pub async fn send(&self, unit: impl Into<Bytes>) -> Result<(), BatchError> {
        self.tx
            .send(unit.into())
            .await
            .map_err(|_| BatchError::Closed)
    }

    /// Submit a unit without waiting.
    pub fn try_send(&self, unit: impl Into<Bytes>) -> Result<(), BatchError> {
        self.tx.try_send(unit.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BatchError::Full,
            mpsc::error::TrySendError::Closed(_) => BatchError::Closed,
        })
    }
}

/// A running batcher: its output channel and the task driving it.
pub struct Batcher {
    output: mpsc::Receiver<Bytes>,
    task: JoinHandle<BatchStats>,
}

impl Batcher {
    /// Spawn a batcher on the current tokio runtime.
    ///
    /// Returns the input handle and the batcher. Drop every [`BatchSender`]
    /// to flush and stop it.
    pub fn spawn(config: BatchConfig) -> (BatchSender, Self) {
        let config = config.with_defaults();
        let (input_tx, input_rx) = mpsc::channel(config.channel_capacity);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let task = tokio::spawn(batch(input_rx, output_tx, config));

        (
            BatchSender { tx: input_tx },
            Self {
                output: output_rx,
                task,
            },
        )
    }

    /// Spawn a batcher with the default config.
    pub fn with_defaults() -> (BatchSender, Self) {
        Self::spawn(BatchConfig::default())
    }

    /// Wait for the next sealed buffer. `None` once the batcher has finished.
    pub async fn next_buffer(&mut self) -> Option<Bytes> {
        self.output.recv().await
    }

    /// Split into the output channel and the task handle.
    pub fn into_parts(self) -> (mpsc::Receiver<Bytes>, JoinHandle<BatchStats>) {
        (self.output, self.task)
    }
}

/// The batching loop.
///
/// Reads units from `input` until it closes, emitting sealed buffers on
/// `output`. Returns when the input is closed and the last partial buffer
/// has been emitted. Dropping `output` on return closes the channel.
pub async fn batch(
    mut input: mpsc::Receiver<Bytes>,
    output: mpsc::Sender<Bytes>,
    config: BatchConfig,
) -> BatchStats {
    let config = config.with_defaults();
    let diagnostics = config
        .diagnostics
        .clone()
        .unwrap_or_else(default_diagnostics);
    let capacity = config.capacity;

    let mut buffer = Buffer::with_capacity(capacity);
    let mut stats = BatchStats::default();
    let mut ticker = interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            maybe_unit = input.recv() => {
                let Some(unit) = maybe_unit else {
                    if !buffer.is_empty() {
                        debug!(len = buffer.len(), "Input closed, sealing final buffer");
                        stats.close_seals += 1;
                        emit(&output, buffer.seal(), &mut stats).await;
                    }
                    info!(
                        units_received = stats.units_received,
                        units_dropped = stats.units_dropped,
                        bytes_sealed = stats.bytes_sealed,
                        "Batcher stopped"
                    );
                    return stats;
                };

                stats.units_received += 1;

                match buffer.push(&unit) {
                    Append::Appended | Append::Skipped => {}
                    Append::Rejected => {
                        stats.units_dropped += 1;
                        diagnostics.report(Diagnostic::OversizedUnit {
                            len: unit.len(),
                            capacity,
                        });
                    }
                    Append::Full => {
                        let full = std::mem::replace(&mut buffer, Buffer::with_capacity(capacity));
                        debug!(len = full.len(), "Size-based seal triggered");
                        stats.size_seals += 1;
                        emit(&output, full.seal(), &mut stats).await;

                        // Not rejected, so it fits in the fresh buffer
                        buffer.push(&unit);
                    }
                }
            }

            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    let due = std::mem::replace(&mut buffer, Buffer::with_capacity(capacity));
                    debug!(
                        len = due.len(),
                        period_ms = config.period.as_millis() as u64,
                        "Time-based seal triggered"
                    );
                    stats.timer_seals += 1;
                    emit(&output, due.seal(), &mut stats).await;
                }
            }
        }
    }
}

/// Hand a sealed buffer downstream and wait until the consumer has taken it.
async fn emit(output: &mpsc::Sender<Bytes>, sealed: Bytes, stats: &mut BatchStats) {
    let len = sealed.len();
    if output.send(sealed).await.is_err() {
        warn!(len = len, "Output channel closed, dropping sealed buffer");
        return;
    }
    stats.bytes_sealed += len as u64;

    // The slot frees up once the buffer is received
    let _ = output.reserve().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingDiagnostics;
    use std::sync::Arc;

    fn config(period: Duration, capacity: usize) -> BatchConfig {
        BatchConfig::new(period, capacity)
    }

    #[test]
    fn test_batch_config_default() {
        let config = BatchConfig::default();
        assert_eq!(config.period, Duration::from_secs(3));
        assert_eq!(config.capacity, 990_000);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.diagnostics.is_some());
    }

    #[test]
    fn test_apply_defaults_fills_zero_fields() {
        let partial = BatchConfig {
            period: Duration::from_secs(10),
            ..BatchConfig::unset()
        };
        let config = partial.with_defaults();

        assert_eq!(config.period, Duration::from_secs(10));
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.diagnostics.is_some());
    }

    #[test]
    fn test_apply_defaults_keeps_set_fields() {
        let partial = BatchConfig {
            period: Duration::from_millis(5),
            capacity: 42,
            channel_capacity: 7,
            diagnostics: None,
        };
        let defaults = BatchConfig::unset();
        let config = apply_defaults(partial, defaults);

        assert_eq!(config.period, Duration::from_millis(5));
        assert_eq!(config.capacity, 42);
        assert_eq!(config.channel_capacity, 7);
        assert!(config.diagnostics.is_none());
    }

    #[tokio::test]
    async fn test_channel_closing_flushes_partial_buffer() {
        let (sender, mut batcher) = Batcher::spawn(config(Duration::from_secs(10), 0));

        sender.send("test log line").await.unwrap();
        drop(sender);

        let buffer = batcher.next_buffer().await.expect("should get final buffer");
        assert_eq!(buffer, Bytes::from_static(b"test log line\n"));
        assert!(batcher.next_buffer().await.is_none());
    }

    #[tokio::test]
    async fn test_closing_empty_batcher_emits_nothing() {
        let (sender, batcher) = Batcher::with_defaults();
        drop(sender);

        let (mut output, task) = batcher.into_parts();
        assert!(output.recv().await.is_none());

        let stats = task.await.unwrap();
        assert_eq!(stats, BatchStats::default());
    }

    #[tokio::test]
    async fn test_buffer_overflow_seals_before_new_unit() {
        let (sender, mut batcher) = Batcher::spawn(config(Duration::from_secs(60), 0));

        let filler = "test log line";
        let filler_len = filler.len() + 1;
        let producer = tokio::spawn(async move {
            let mut written = 0;
            while written + filler_len < DEFAULT_CAPACITY {
                sender.send(filler).await.unwrap();
                written += filler_len;
            }
            sender.send("overflowed").await.unwrap();
        });

        let first = batcher.next_buffer().await.expect("should get full buffer");
        assert!(first.len() <= DEFAULT_CAPACITY);
        assert!(first.len() + "overflowed".len() + 1 > DEFAULT_CAPACITY);
        assert_eq!(first.len() % filler_len, 0);
        assert!(first.starts_with(b"test log line\ntest log line\n"));

        let second = batcher.next_buffer().await.expect("should get overflow buffer");
        assert_eq!(second, Bytes::from_static(b"overflowed\n"));

        producer.await.unwrap();
        assert!(batcher.next_buffer().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_unit_is_dropped() {
        let diagnostics = Arc::new(RecordingDiagnostics::new());
        let (sender, batcher) = Batcher::spawn(
            BatchConfig::default().with_diagnostics(diagnostics.clone()),
        );

        let line = "test log line".repeat(DEFAULT_CAPACITY / 13 + 1);
        assert!(line.len() >= DEFAULT_CAPACITY);
        sender.send(line.clone()).await.unwrap();
        drop(sender);

        let (mut output, task) = batcher.into_parts();
        assert!(output.recv().await.is_none());

        let stats = task.await.unwrap();
        assert_eq!(stats.units_received, 1);
        assert_eq!(stats.units_dropped, 1);
        assert_eq!(
            diagnostics.records(),
            vec![Diagnostic::OversizedUnit {
                len: line.len(),
                capacity: DEFAULT_CAPACITY,
            }]
        );
    }

    #[tokio::test]
    async fn test_unit_of_capacity_minus_one_fits() {
        let (sender, mut batcher) = Batcher::spawn(config(Duration::from_secs(10), 8));

        sender.send("1234567").await.unwrap();
        sender.send("12345678").await.unwrap();
        drop(sender);

        let buffer = batcher.next_buffer().await.unwrap();
        assert_eq!(buffer, Bytes::from_static(b"1234567\n"));
        assert!(batcher.next_buffer().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_units_are_ignored() {
        let (sender, mut batcher) = Batcher::spawn(config(Duration::from_secs(10), 8));

        sender.send("abc").await.unwrap();
        sender.send("").await.unwrap();
        sender.send("def").await.unwrap();
        drop(sender);

        let buffer = batcher.next_buffer().await.unwrap();
        assert_eq!(buffer, Bytes::from_static(b"abc\ndef\n"));
        assert!(batcher.next_buffer().await.is_none());
    }

    #[tokio::test]
    async fn test_buffers_preserve_arrival_order() {
        let capacity = 32;
        let (sender, batcher) = Batcher::spawn(config(Duration::from_secs(60), capacity));
        let units: Vec<String> = (0..200).map(|i| format!("line-{}", i)).collect();

        let to_send = units.clone();
        let producer = tokio::spawn(async move {
            for unit in to_send {
                sender.send(unit).await.unwrap();
            }
        });

        let (mut output, task) = batcher.into_parts();
        let mut joined = Vec::new();
        while let Some(buffer) = output.recv().await {
            assert!(buffer.len() <= capacity);
            assert!(buffer.ends_with(b"\n"));
            joined.extend_from_slice(&buffer);
        }
        producer.await.unwrap();

        let expected: String = units.iter().map(|u| format!("{}\n", u)).collect();
        assert_eq!(joined, expected.into_bytes());

        let stats = task.await.unwrap();
        assert_eq!(stats.units_received, 200);
        assert_eq!(stats.close_seals, 1);
        assert_eq!(stats.bytes_sealed as usize, joined.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_based_seal() {
        let (sender, mut batcher) = Batcher::spawn(config(Duration::from_secs(3), 0));

        sender.send("first").await.unwrap();
        sender.send("second").await.unwrap();

        // Paused clock auto-advances to the next tick
        let buffer = batcher.next_buffer().await.unwrap();
        assert_eq!(buffer, Bytes::from_static(b"first\nsecond\n"));

        sender.send("third").await.unwrap();
        let buffer = batcher.next_buffer().await.unwrap();
        assert_eq!(buffer, Bytes::from_static(b"third\n"));

        drop(sender);
        assert!(batcher.next_buffer().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_do_not_emit_empty_buffers() {
        let (sender, batcher) = Batcher::spawn(config(Duration::from_millis(100), 0));

        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(sender);

        let (mut output, task) = batcher.into_parts();
        assert!(output.recv().await.is_none());
        assert_eq!(task.await.unwrap().timer_seals, 0);
    }

    #[tokio::test]
    async fn test_emit_waits_for_consumer() {
        let (sender, mut batcher) = Batcher::spawn(config(Duration::from_secs(60), 4));

        sender.send("abc").await.unwrap();
        // Seals "abc\n" and holds "def" until the buffer is taken
        sender.send("def").await.unwrap();
        // Only accepted once the batcher has taken "def" off the channel
        sender.send("ghi").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sender.try_send("jkl"), Err(BatchError::Full));

        let first = batcher.next_buffer().await.unwrap();
        assert_eq!(first, Bytes::from_static(b"abc\n"));
        drop(sender);

        assert_eq!(batcher.next_buffer().await.unwrap(), Bytes::from_static(b"def\n"));
        assert_eq!(batcher.next_buffer().await.unwrap(), Bytes::from_static(b"ghi\n"));
        assert!(batcher.next_buffer().await.is_none());
    }

    #[tokio::test]
    async fn test_sender_try_send() {
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        let sender = BatchSender { tx };

        sender.try_send("one").unwrap();
        assert_eq!(sender.try_send("two"), Err(BatchError::Full));
    }

    #[tokio::test]
    async fn test_sender_closed_error() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        let sender = BatchSender { tx };
        drop(rx);

        assert_eq!(sender.send("line").await, Err(BatchError::Closed));
        assert_eq!(sender.try_send("line"), Err(BatchError::Closed));
    }

    #[tokio::test]
    async fn test_batch_error_display() {
        assert_eq!(BatchError::Full.to_string(), "batcher input channel is full");
        assert_eq!(BatchError::Closed.to_string(), "batcher has been closed");
    }
}
