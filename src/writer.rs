//! Single-appender task for the service tier.
//!
//! This module provides the `ProduceRequest` struct and the `AppendHandle`
//! that gRPC handlers use to submit records to the appender task via a
//! bounded `tokio::mpsc` channel. The task owns the hot write path: appends
//! are serialized at the service tier, the channel bound provides
//! backpressure, and the async runtime stays off the synchronous I/O path.
//! Reads do not go through the task; they hit the shared [`Log`] directly
//! under its read lock.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::log::Log;

/// A request to append one record, sent to the appender task over the mpsc
/// channel.
pub struct ProduceRequest {
    /// Opaque record payload.
    pub record: Bytes,
    /// Oneshot channel carrying the assigned offset (or error) back to the
    /// caller.
    pub response_tx: tokio::sync::oneshot::Sender<Result<u64>>,
}

/// Cloneable handle for submitting records to the appender task.
///
/// gRPC handlers hold an `AppendHandle` and call [`AppendHandle::append`] to
/// enqueue work. Cloning produces a second sender into the same channel, so
/// multiple handlers can submit concurrently while the task processes
/// requests one at a time.
#[derive(Clone)]
pub struct AppendHandle {
    tx: tokio::sync::mpsc::Sender<ProduceRequest>,
}

impl AppendHandle {
    /// Create a new `AppendHandle` from the sender half of an mpsc channel.
    pub fn new(tx: tokio::sync::mpsc::Sender<ProduceRequest>) -> Self {
        Self { tx }
    }

    /// Submit a record to the appender task and await its assigned offset.
    ///
    /// # Errors
    ///
    /// - Returns the log's error if the append fails.
    /// - Returns a `BrokenPipe` I/O error if the appender task has shut down.
    pub async fn append(&self, record: Bytes) -> Result<u64> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();

        self.tx
            .send(ProduceRequest {
                record,
                response_tx,
            })
            .await
            .map_err(|_| closed_error())?;

        // If the oneshot is dropped without a reply, the task panicked or was
        // cancelled mid-request.
        response_rx.await.map_err(|_| closed_error())?
    }
}

fn closed_error() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "appender task closed",
    ))
}

/// Run the appender task loop.
///
/// Receives `ProduceRequest`s from the channel and appends each record to the
/// log in arrival order. The first request of each iteration is received with
/// a blocking `recv()`; any further pending requests are drained with
/// `try_recv()` so a burst is processed without re-entering the scheduler.
/// The loop exits cleanly once every `AppendHandle` has been dropped.
pub(crate) async fn run_appender(
    log: Arc<Log>,
    mut rx: tokio::sync::mpsc::Receiver<ProduceRequest>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(req) = rx.try_recv() {
            batch.push(req);
        }

        for req in batch {
            let result = log.append(&req.record);
            if result.is_ok() {
                metrics::counter!("logkeep_appends_total").increment(1);
            }

            // If the oneshot receiver was already dropped (caller timed out
            // or disconnected), log and move on; the record is stored either
            // way.
            if let Err(dropped) = req.response_tx.send(result) {
                tracing::warn!(
                    result = ?dropped,
                    "appender: response receiver dropped"
                );
            }
        }
    }
}

/// Spawn the appender task on the tokio runtime.
///
/// Creates a bounded mpsc channel with the given capacity and moves a clone
/// of the shared log into the spawned task.
///
/// # Returns
///
/// A pair of:
/// - `AppendHandle` -- cloneable sender for submitting records.
/// - `JoinHandle<()>` -- resolves once every handle is dropped and the task
///   has drained its queue.
pub fn spawn_appender(
    log: Arc<Log>,
    channel_capacity: usize,
) -> (AppendHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = tokio::sync::mpsc::channel(channel_capacity);
    let handle = AppendHandle::new(tx);
    let join_handle = tokio::spawn(run_appender(log, rx));
    (handle, join_handle)
}
