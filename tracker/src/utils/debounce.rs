//! Keyed debouncer for coalescing rapid document changes.
//!
//! Every change event for a file replaces the pending value for that file and
//! pushes its deadline out by the debounce interval. When a deadline passes
//! without a newer event, the last value is emitted. Files are debounced
//! independently of each other.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use devboost_tracker::utils::debounce::Debouncer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (output_tx, mut output_rx) = mpsc::channel(100);
//!     let debouncer = Debouncer::new(Duration::from_millis(50), output_tx);
//!
//!     let path = PathBuf::from("/work/app/src/main.rs");
//!     debouncer.send(path.clone(), "fn".to_string()).await.unwrap();
//!     debouncer.send(path.clone(), "fn main() {}".to_string()).await.unwrap();
//!
//!     // Only the last content is emitted
//!     if let Some((key, content)) = output_rx.recv().await {
//!         assert_eq!(key, path);
//!         assert_eq!(content, "fn main() {}");
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Default debounce interval in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// Error type for debouncer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebouncerError {
    /// The debouncer's input channel has been closed.
    #[error("debouncer channel closed")]
    ChannelClosed,
}

/// Instruction sent to the background task.
#[derive(Debug)]
enum Command<K, V> {
    Push(K, V),
    Cancel(K, oneshot::Sender<Option<V>>),
}

/// A pending value waiting for its debounce timer to expire.
#[derive(Debug)]
struct PendingEvent<V> {
    value: V,
    deadline: Instant,
}

/// A debouncer that coalesces rapid events by key.
///
/// The debounce state lives in a background task; this handle only feeds it.
/// Dropping the handle flushes whatever is still pending.
#[derive(Debug)]
pub struct Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    input_tx: mpsc::Sender<Command<K, V>>,
}

impl<K, V> Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
    V: Send + 'static,
{
    /// Creates a new debouncer with the specified interval.
    ///
    /// Spawns the background task, so this must be called inside a Tokio
    /// runtime.
    #[must_use]
    pub fn new(interval: Duration, output_tx: mpsc::Sender<(K, V)>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(1000);

        tokio::spawn(async move {
            run_debounce_loop(interval, input_rx, output_tx).await;
        });

        Self { input_tx }
    }

    /// Creates a new debouncer with the default interval (50ms).
    #[must_use]
    pub fn with_default_interval(output_tx: mpsc::Sender<(K, V)>) -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS), output_tx)
    }

    /// Sends a value to be debounced, replacing any pending value for `key`.
    ///
    /// # Errors
    ///
    /// Returns `DebouncerError::ChannelClosed` if the background task has
    /// terminated.
    pub async fn send(&self, key: K, value: V) -> Result<(), DebouncerError> {
        self.input_tx
            .send(Command::Push(key, value))
            .await
            .map_err(|_| DebouncerError::ChannelClosed)
    }

    /// Removes the pending value for `key` without emitting it and returns
    /// it.
    ///
    /// Commands are handled in order, so once this returns every value the
    /// task emitted for `key` is already in the output channel.
    ///
    /// # Errors
    ///
    /// Returns `DebouncerError::ChannelClosed` if the background task has
    /// terminated.
    pub async fn cancel(&self, key: K) -> Result<Option<V>, DebouncerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.input_tx
            .send(Command::Cancel(key, reply_tx))
            .await
            .map_err(|_| DebouncerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DebouncerError::ChannelClosed)
    }
}

async fn run_debounce_loop<K, V>(
    interval: Duration,
    mut input_rx: mpsc::Receiver<Command<K, V>>,
    output_tx: mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    let mut pending: HashMap<K, PendingEvent<V>> = HashMap::new();

    debug!(interval_ms = interval.as_millis(), "Starting debounce loop");

    loop {
        let next_deadline = pending.values().map(|p| p.deadline).min();

        tokio::select! {
            command = input_rx.recv() => {
                match command {
                    Some(Command::Push(key, value)) => {
                        trace!(key = ?key, "Received change, setting deadline");
                        let deadline = Instant::now() + interval;
                        pending.insert(key, PendingEvent { value, deadline });
                    }
                    Some(Command::Cancel(key, reply)) => {
                        let value = pending.remove(&key).map(|event| event.value);
                        if value.is_some() {
                            trace!(key = ?key, "Cancelled pending change");
                        }
                        // The caller may have stopped waiting
                        let _ = reply.send(value);
                    }
                    None => {
                        debug!("Input channel closed, flushing remaining changes");
                        flush_all_pending(&mut pending, &output_tx).await;
                        break;
                    }
                }
            }

            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                emit_expired_events(&mut pending, &output_tx).await;
            }
        }
    }

    debug!("Debounce loop terminated");
}

/// Emits all values whose deadlines have passed.
async fn emit_expired_events<K, V>(
    pending: &mut HashMap<K, PendingEvent<V>>,
    output_tx: &mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    let now = Instant::now();

    let expired_keys: Vec<K> = pending
        .iter()
        .filter(|(_, event)| event.deadline <= now)
        .map(|(key, _)| key.clone())
        .collect();

    for key in expired_keys {
        if let Some(event) = pending.remove(&key) {
            trace!(key = ?key, "Emitting debounced change");
            if output_tx.send((key.clone(), event.value)).await.is_err() {
                warn!(key = ?key, "Failed to emit debounced change, receiver dropped");
            }
        }
    }
}

/// Flushes all pending values immediately, regardless of their deadlines.
async fn flush_all_pending<K, V>(
    pending: &mut HashMap<K, PendingEvent<V>>,
    output_tx: &mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    for (key, event) in pending.drain() {
        trace!(key = ?key, "Flushing pending change");
        if output_tx.send((key.clone(), event.value)).await.is_err() {
            warn!(key = ?key, "Failed to flush pending change, receiver dropped");
        }
    }
}
