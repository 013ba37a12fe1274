//! Integration tests for the LogkeepDB gRPC service: Produce, Consume, Offsets.
//!
//! Each test spins up a real tonic server on an ephemeral port using
//! `start_test_server`, connects a gRPC client, and exercises the RPCs. The
//! server runs the full stack: Log -> appender task -> CommitLogService -> tonic.

use std::path::Path;
use std::sync::Arc;

use logkeep_db::proto::commit_log_client::CommitLogClient;
use logkeep_db::proto::commit_log_server::CommitLogServer;
use logkeep_db::{AppendHandle, CommitLogService, Config, Log, SegmentConfig, proto, spawn_appender};
use tonic::transport::Channel;

/// A running in-process server plus everything needed to shut it down cleanly.
struct TestServer {
    client: CommitLogClient<Channel>,
    server: tokio::task::JoinHandle<()>,
    appender: tokio::task::JoinHandle<()>,
    handle: AppendHandle,
    log: Arc<Log>,
}

/// Spin up an in-process gRPC server over a log in `dir` and return a
/// connected client along with the pieces needed for a clean shutdown.
async fn start_test_server(dir: &Path, config: Config) -> TestServer {
    let log = Arc::new(Log::open(dir, config).expect("open should succeed"));
    let (handle, appender) = spawn_appender(Arc::clone(&log), 64);
    let service = CommitLogService::new(handle.clone(), Arc::clone(&log));

    let listener = tokio::net::TcpListener::bind("[::1]:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("should have local addr");
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

    let server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(CommitLogServer::new(service))
            .serve_with_incoming(incoming)
            .await
            .expect("server should run");
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = CommitLogClient::connect(format!("http://[::1]:{}", addr.port()))
        .await
        .expect("client connect should succeed");

    TestServer {
        client,
        server,
        appender,
        handle,
        log,
    }
}

/// Stop the server, drain the appender, and close the log so every buffered
/// write is flushed and synced to disk.
async fn shutdown(ts: TestServer) {
    ts.server.abort();
    let _ = ts.server.await;
    drop(ts.client);
    drop(ts.handle);
    ts.appender.await.expect("appender task should exit cleanly");
    let log = Arc::try_unwrap(ts.log).expect("all log handles should be gone");
    log.close().expect("close should succeed");
}

#[tokio::test]
async fn produce_assigns_sequential_offsets() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut ts = start_test_server(dir.path(), Config::default()).await;

    for want in 0..3u64 {
        let resp = ts
            .client
            .produce(proto::ProduceRequest {
                record: format!("record-{want}").into_bytes(),
            })
            .await
            .expect("produce should succeed");
        assert_eq!(resp.into_inner().offset, want);
    }

    shutdown(ts).await;
}

#[tokio::test]
async fn consume_returns_produced_bytes() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut ts = start_test_server(dir.path(), Config::default()).await;

    for i in 0..3u64 {
        ts.client
            .produce(proto::ProduceRequest {
                record: format!("record-{i}").into_bytes(),
            })
            .await
            .expect("produce should succeed");
    }

    for i in 0..3u64 {
        let resp = ts
            .client
            .consume(proto::ConsumeRequest { offset: i })
            .await
            .expect("consume should succeed");
        assert_eq!(resp.into_inner().record, format!("record-{i}").into_bytes());
    }

    shutdown(ts).await;
}

#[tokio::test]
async fn consume_past_end_returns_not_found() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut ts = start_test_server(dir.path(), Config::default()).await;

    ts.client
        .produce(proto::ProduceRequest {
            record: b"only".to_vec(),
        })
        .await
        .expect("produce should succeed");

    let err = ts
        .client
        .consume(proto::ConsumeRequest { offset: 1 })
        .await
        .expect_err("consume past the end should fail");
    assert_eq!(err.code(), tonic::Code::NotFound);

    shutdown(ts).await;
}

#[tokio::test]
async fn produce_empty_record_returns_invalid_argument() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut ts = start_test_server(dir.path(), Config::default()).await;

    let err = ts
        .client
        .produce(proto::ProduceRequest { record: vec![] })
        .await
        .expect_err("empty record should be rejected");
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    shutdown(ts).await;
}

#[tokio::test]
async fn offsets_reports_low_and_high_water_marks() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut ts = start_test_server(dir.path(), Config::default()).await;

    for _ in 0..5 {
        ts.client
            .produce(proto::ProduceRequest {
                record: b"record".to_vec(),
            })
            .await
            .expect("produce should succeed");
    }

    let resp = ts
        .client
        .offsets(proto::OffsetsRequest {})
        .await
        .expect("offsets should succeed")
        .into_inner();
    assert_eq!(resp.lowest, 0);
    assert_eq!(resp.highest, 4);

    shutdown(ts).await;
}

#[tokio::test]
async fn records_survive_a_clean_restart() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let config = Config {
        segment: SegmentConfig {
            // Small budgets so the five records span several segments.
            max_store_bytes: 64,
            max_index_bytes: 36,
            initial_offset: 0,
        },
    };

    // First run: produce five records and shut down cleanly.
    {
        let mut ts = start_test_server(dir.path(), config.clone()).await;
        for i in 0..5u64 {
            ts.client
                .produce(proto::ProduceRequest {
                    record: format!("durable-{i}").into_bytes(),
                })
                .await
                .expect("produce should succeed");
        }
        shutdown(ts).await;
    }

    // Second run: a fresh server over the same directory serves them all.
    {
        let mut ts = start_test_server(dir.path(), config).await;
        for i in 0..5u64 {
            let resp = ts
                .client
                .consume(proto::ConsumeRequest { offset: i })
                .await
                .expect("consume should succeed");
            assert_eq!(
                resp.into_inner().record,
                format!("durable-{i}").into_bytes()
            );
        }

        let resp = ts
            .client
            .offsets(proto::OffsetsRequest {})
            .await
            .expect("offsets should succeed")
            .into_inner();
        assert_eq!(resp.lowest, 0);
        assert_eq!(resp.highest, 4);

        shutdown(ts).await;
    }
}

#[tokio::test]
async fn concurrent_producers_get_distinct_offsets() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let ts = start_test_server(dir.path(), Config::default()).await;

    let mut tasks = Vec::with_capacity(10);
    for i in 0..10u64 {
        let mut client = ts.client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .produce(proto::ProduceRequest {
                    record: format!("concurrent-{i}").into_bytes(),
                })
                .await
                .expect("produce should succeed")
                .into_inner()
                .offset
        }));
    }

    let mut offsets = std::collections::HashSet::new();
    for task in tasks {
        offsets.insert(task.await.expect("task should not panic"));
    }
    let expected: std::collections::HashSet<u64> = (0..10).collect();
    assert_eq!(offsets, expected);

    shutdown(ts).await;
}
