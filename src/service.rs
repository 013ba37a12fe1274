//! gRPC service layer for LogkeepDB.
//!
//! This module contains the `CommitLogService` struct that holds the append
//! handle and the shared log, along with the translation from crate errors to
//! gRPC status codes. The service is deliberately thin: it validates requests,
//! marshals bytes and offsets, and delegates everything else to the core.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;

use crate::error::Error;
use crate::log::Log;
use crate::proto;
use crate::writer::AppendHandle;

/// gRPC service implementation for LogkeepDB.
///
/// Holds the two dependencies every RPC handler needs:
///
/// - `appender` -- handle to submit records to the single appender task.
/// - `log` -- shared log, read directly by consume and offsets handlers.
pub struct CommitLogService {
    /// Handle for submitting records to the appender task.
    pub appender: AppendHandle,
    /// Shared log for the read paths.
    pub log: Arc<Log>,
}

impl CommitLogService {
    /// Create a new `CommitLogService` with the given dependencies.
    pub fn new(appender: AppendHandle, log: Arc<Log>) -> Self {
        Self { appender, log }
    }
}

#[tonic::async_trait]
impl proto::commit_log_server::CommitLog for CommitLogService {
    /// Append a record to the log and return its assigned offset.
    ///
    /// Rejects empty records; the offset space is too cheap to spend on
    /// nothing.
    async fn produce(
        &self,
        request: tonic::Request<proto::ProduceRequest>,
    ) -> Result<tonic::Response<proto::ProduceResponse>, tonic::Status> {
        let req = request.into_inner();

        if req.record.is_empty() {
            return Err(tonic::Status::invalid_argument("record must not be empty"));
        }

        let offset = self
            .appender
            .append(Bytes::from(req.record))
            .await
            .map_err(error_to_status)?;

        Ok(tonic::Response::new(proto::ProduceResponse { offset }))
    }

    /// Fetch the record stored at the requested offset.
    async fn consume(
        &self,
        request: tonic::Request<proto::ConsumeRequest>,
    ) -> Result<tonic::Response<proto::ConsumeResponse>, tonic::Status> {
        counter!("logkeep_reads_total", "rpc" => "consume").increment(1);
        let req = request.into_inner();

        let record = self.log.read(req.offset).map_err(error_to_status)?;

        Ok(tonic::Response::new(proto::ConsumeResponse {
            record: record.to_vec(),
        }))
    }

    /// Report the log's current low and high water marks.
    async fn offsets(
        &self,
        _request: tonic::Request<proto::OffsetsRequest>,
    ) -> Result<tonic::Response<proto::OffsetsResponse>, tonic::Status> {
        counter!("logkeep_reads_total", "rpc" => "offsets").increment(1);

        Ok(tonic::Response::new(proto::OffsetsResponse {
            lowest: self.log.lowest_offset(),
            highest: self.log.highest_offset(),
        }))
    }
}

/// Map a crate error to the gRPC status the wire contract promises.
fn error_to_status(err: Error) -> tonic::Status {
    match err {
        Error::OffsetOutOfRange { offset } => {
            tonic::Status::not_found(format!("offset {offset} is out of range"))
        }
        Error::Eof => tonic::Status::failed_precondition("log segment is full"),
        Error::Io(e) => tonic::Status::internal(format!("I/O error: {e}")),
        Error::Corrupt(detail) => tonic::Status::data_loss(detail),
    }
}
