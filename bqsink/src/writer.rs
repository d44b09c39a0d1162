//! Owns the write stream of one destination table.
//!
//! A single stream is shared by every caller of a [StreamWriterManager]. Inspecting the stream,
//! replacing it and submitting rows happen under one lock, which keeps submissions ordered.
//! Waiting for the service to acknowledge a submission happens after the lock is released so
//! concurrent callers only serialize on the submission.
//!
//! ```text
//! Uninitialized --init--> Ready --append--> Ready
//!                           |  \--schema changed--> close old, open new --> Ready
//!                           |  \--closed remotely--> reopen --> Ready
//!                           |  \--reopen failed--> Broken --append--> open --> Ready
//!                           \--close--> Closed (terminal)
//! ```

use bqsink_pb::rpc;
use bqsink_pb::storage::{AppendRowsResponse, ProtoRows, TableSchema, append_rows_response};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tonic::Code;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::metrics::{self, Operation};
use crate::payload::IndexedPayload;
use crate::schema::{TableName, WireDescriptor};

pub mod grpc;

pub(crate) const CLOSED_MESSAGE: &str = "stream writer is permanently closed";
const NOT_INITIALIZED_MESSAGE: &str = "stream writer is not initialized";

/// Resolves once the service answered a submission.
pub type AppendFuture = BoxFuture<'static, Result<AppendRowsResponse>>;

/// Source of the current schema of a table.
#[trait_variant::make(SchemaSource: Send)]
pub trait LocalSchemaSource {
    async fn current_schema(&self, table: &TableName) -> Result<TableSchema>;
}

/// Opens write streams bound to a row descriptor.
#[trait_variant::make(StreamFactory: Send)]
pub trait LocalStreamFactory {
    type Handle: StreamHandle + Send + 'static;

    async fn open(&self, table: &TableName, descriptor: &WireDescriptor) -> Result<Self::Handle>;
}

/// An open write stream.
#[trait_variant::make(StreamHandle: Send)]
pub trait LocalStreamHandle {
    /// Submits rows to the stream. The returned future resolves with the service response.
    async fn append(&mut self, rows: ProtoRows) -> Result<AppendFuture>;

    /// The table schema reported by the service if it changed since the stream was opened.
    fn updated_schema(&self) -> Option<TableSchema>;

    /// Whether the service ended the stream.
    fn is_closed(&self) -> bool;

    async fn close(&mut self);
}

struct ActiveStream<H> {
    descriptor: WireDescriptor,
    handle: H,
}

enum StreamState<H> {
    Uninitialized,
    Ready(ActiveStream<H>),
    /// The previous stream is gone and its replacement could not be opened yet.
    Broken(WireDescriptor),
    /// Keeps the last descriptor so batches can still be converted after close.
    Closed(Option<WireDescriptor>),
}

/// Manages the single write stream of a table. Meant to be shared, e.g. behind an `Arc`.
pub struct StreamWriterManager<F: StreamFactory, S> {
    table: TableName,
    factory: F,
    schema_source: S,
    state: Mutex<StreamState<F::Handle>>,
}

impl<F, S> StreamWriterManager<F, S>
where
    F: StreamFactory,
    S: SchemaSource,
{
    pub fn new(table: TableName, factory: F, schema_source: S) -> Self {
        Self {
            table,
            factory,
            schema_source,
            state: Mutex::new(StreamState::Uninitialized),
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Fetches the table schema and opens the stream. Does nothing if the stream is already open.
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match &*state {
            // a broken stream is reopened by the next append
            StreamState::Ready(_) | StreamState::Broken(_) => return Ok(()),
            StreamState::Closed(_) => return Err(Error::Stream(CLOSED_MESSAGE.to_string())),
            StreamState::Uninitialized => {}
        }

        let schema = SchemaSource::current_schema(&self.schema_source, &self.table).await?;
        *state = StreamState::Ready(self.open_for_schema(&schema).await?);
        Ok(())
    }

    /// Descriptor rows must currently be built with.
    pub async fn wire_descriptor(&self) -> Result<WireDescriptor> {
        match &*self.state.lock().await {
            StreamState::Ready(stream) => Ok(stream.descriptor.clone()),
            StreamState::Broken(descriptor) | StreamState::Closed(Some(descriptor)) => {
                Ok(descriptor.clone())
            }
            StreamState::Uninitialized => Err(Error::Stream(NOT_INITIALIZED_MESSAGE.to_string())),
            StreamState::Closed(None) => Err(Error::Stream(CLOSED_MESSAGE.to_string())),
        }
    }

    /// Submits the rows of `payload` and waits for the service response.
    ///
    /// Stream-level and per-row errors reported by the service are returned as part of the
    /// response. An error is returned only if the rows could not be submitted or the stream
    /// failed before answering.
    pub async fn append_and_get(&self, payload: &IndexedPayload) -> Result<AppendRowsResponse> {
        let pending = {
            let mut state = self.state.lock().await;
            self.refresh(&mut state).await?;
            let stream = match &mut *state {
                StreamState::Ready(stream) => stream,
                StreamState::Closed(_) => return Ok(closed_response()),
                StreamState::Uninitialized | StreamState::Broken(_) => {
                    return Err(Error::Stream(NOT_INITIALIZED_MESSAGE.to_string()));
                }
            };

            metrics::record_append(&self.table, payload.valid_count(), payload.byte_size());
            StreamHandle::append(&mut stream.handle, payload.rows().clone()).await?
        };

        let start = Instant::now();
        let response = pending.await;
        metrics::record_operation(&self.table, Operation::Append, start.elapsed());
        response
    }

    /// Closes the stream. Every later append is answered with a closed response.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let descriptor = match &mut *state {
            StreamState::Ready(stream) => {
                self.close_handle(&mut stream.handle).await;
                Some(stream.descriptor.clone())
            }
            StreamState::Broken(descriptor) => Some(descriptor.clone()),
            StreamState::Closed(descriptor) => descriptor.take(),
            StreamState::Uninitialized => None,
        };
        *state = StreamState::Closed(descriptor);
    }

    /// Replaces the stream when the schema changed, the service closed it or an earlier
    /// replacement failed. The old stream is closed before the new one is opened.
    async fn refresh(&self, state: &mut StreamState<F::Handle>) -> Result<()> {
        let descriptor = match state {
            StreamState::Ready(stream) => {
                // the schema can change between two appends
                if let Some(schema) = StreamHandle::updated_schema(&stream.handle) {
                    info!(table = %self.table, "Table schema changed, recreating write stream");
                    let descriptor = WireDescriptor::from_table_schema(&schema)?;
                    self.close_handle(&mut stream.handle).await;
                    descriptor
                } else if StreamHandle::is_closed(&stream.handle) {
                    warn!(table = %self.table, "Write stream was closed by the service, reopening");
                    stream.descriptor.clone()
                } else {
                    return Ok(());
                }
            }
            StreamState::Broken(descriptor) => {
                warn!(table = %self.table, "Retrying to open the write stream");
                descriptor.clone()
            }
            StreamState::Uninitialized | StreamState::Closed(_) => return Ok(()),
        };

        // never keep a handle that was closed, even if the replacement fails to open
        *state = StreamState::Broken(descriptor.clone());
        *state = StreamState::Ready(self.open(descriptor).await?);
        Ok(())
    }

    async fn open_for_schema(&self, schema: &TableSchema) -> Result<ActiveStream<F::Handle>> {
        let descriptor = WireDescriptor::from_table_schema(schema)?;
        self.open(descriptor).await
    }

    async fn open(&self, descriptor: WireDescriptor) -> Result<ActiveStream<F::Handle>> {
        let start = Instant::now();
        let handle = StreamFactory::open(&self.factory, &self.table, &descriptor).await?;
        metrics::record_operation(&self.table, Operation::CreateStream, start.elapsed());
        info!(table = %self.table, "Opened write stream");
        Ok(ActiveStream { descriptor, handle })
    }

    async fn close_handle(&self, handle: &mut F::Handle) {
        let start = Instant::now();
        StreamHandle::close(handle).await;
        metrics::record_operation(&self.table, Operation::CloseStream, start.elapsed());
        info!(table = %self.table, "Closed write stream");
    }
}

/// The answer to appends on a closed writer. No request is made.
fn closed_response() -> AppendRowsResponse {
    AppendRowsResponse {
        response: Some(append_rows_response::Response::Error(rpc::Status {
            code: Code::FailedPrecondition as i32,
            message: CLOSED_MESSAGE.to_string(),
            details: vec![],
        })),
        ..Default::default()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bqsink_pb::storage::table_field_schema::{Mode, Type};
    use bytes::Bytes;
    use tokio::sync::Semaphore;

    use super::test_utils::{MockSchemaSource, MockStreamFactory};
    use super::*;
    use crate::schema::test_utils::{column, table_schema};

    type TestManager = StreamWriterManager<MockStreamFactory, MockSchemaSource>;

    fn two_columns() -> TableSchema {
        table_schema(vec![
            column("id", Type::String, Mode::Required),
            column("amount", Type::Double, Mode::Nullable),
        ])
    }

    fn manager(factory: MockStreamFactory) -> TestManager {
        StreamWriterManager::new(
            TableName::new("proj", "ds", "writer_test"),
            factory,
            MockSchemaSource::new(two_columns()),
        )
    }

    fn payload(rows: usize) -> IndexedPayload {
        let mut payload = IndexedPayload::with_capacity(rows);
        for index in 0..rows {
            payload.push_valid(index as i64, Bytes::from_static(b"row"));
        }
        payload
    }

    #[test_log::test(tokio::test)]
    async fn test_init_opens_one_stream() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());

        assert!(manager.wire_descriptor().await.is_err());
        manager.init().await.unwrap();
        manager.init().await.unwrap();

        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.last_columns.load(Ordering::SeqCst), 2);
        let descriptor = manager.wire_descriptor().await.unwrap();
        assert!(descriptor.message().get_field_by_name("amount").is_some());
    }

    #[tokio::test]
    async fn test_init_fails_on_invalid_schema() {
        let manager = StreamWriterManager::new(
            TableName::new("proj", "ds", "writer_test"),
            MockStreamFactory::default(),
            MockSchemaSource::new(table_schema(vec![])),
        );
        assert!(matches!(manager.init().await, Err(Error::Schema(_))));
    }

    #[tokio::test]
    async fn test_append_before_init() {
        let manager = manager(MockStreamFactory::default());
        assert!(matches!(
            manager.append_and_get(&payload(1)).await,
            Err(Error::Stream(_))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_append_uses_current_stream() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());
        manager.init().await.unwrap();

        let response = manager.append_and_get(&payload(3)).await.unwrap();
        assert!(matches!(
            response.response,
            Some(append_rows_response::Response::AppendResult(_))
        ));
        assert_eq!(factory.stats.appended.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_schema_drift_recreates_stream() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());
        manager.init().await.unwrap();
        manager.append_and_get(&payload(1)).await.unwrap();

        let mut widened = two_columns();
        widened
            .fields
            .push(column("note", Type::String, Mode::Nullable));
        *factory.drift.lock() = Some(widened);

        manager.append_and_get(&payload(2)).await.unwrap();

        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.appended.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.last_handle.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.last_columns.load(Ordering::SeqCst), 3);
        let descriptor = manager.wire_descriptor().await.unwrap();
        assert!(descriptor.message().get_field_by_name("note").is_some());

        // no drift reported by the new stream
        manager.append_and_get(&payload(1)).await.unwrap();
        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_recreation_is_retried() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());
        manager.init().await.unwrap();

        let mut widened = two_columns();
        widened
            .fields
            .push(column("note", Type::String, Mode::Nullable));
        *factory.drift.lock() = Some(widened);
        factory.open_failures.store(1, Ordering::SeqCst);

        // the old stream is closed and never used again
        let err = manager.append_and_get(&payload(1)).await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.appended.load(Ordering::SeqCst), 0);
        let descriptor = manager.wire_descriptor().await.unwrap();
        assert!(descriptor.message().get_field_by_name("note").is_some());
        manager.init().await.unwrap();

        manager.append_and_get(&payload(1)).await.unwrap();
        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.appended.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.last_handle.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.last_columns.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_after_failed_recreation() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());
        manager.init().await.unwrap();

        factory.remote_closed.store(true, Ordering::SeqCst);
        factory.open_failures.store(1, Ordering::SeqCst);
        assert!(manager.append_and_get(&payload(1)).await.is_err());

        manager.close().await;
        let response = manager.append_and_get(&payload(1)).await.unwrap();
        assert!(matches!(
            response.response,
            Some(append_rows_response::Response::Error(_))
        ));
        assert!(manager.wire_descriptor().await.is_ok());
        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.appended.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_remote_close_reopens_with_same_descriptor() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());
        manager.init().await.unwrap();

        factory.remote_closed.store(true, Ordering::SeqCst);
        manager.append_and_get(&payload(1)).await.unwrap();

        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 0);
        assert_eq!(factory.stats.last_handle.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.last_columns.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_closed_manager_short_circuits() {
        let factory = MockStreamFactory::default();
        let manager = manager(factory.clone());
        manager.init().await.unwrap();
        manager.close().await;
        manager.close().await;

        let response = manager.append_and_get(&payload(2)).await.unwrap();
        let Some(append_rows_response::Response::Error(status)) = response.response else {
            panic!("expected a closed response");
        };
        assert_eq!(status.code, Code::FailedPrecondition as i32);
        assert_eq!(status.message, CLOSED_MESSAGE);

        assert_eq!(factory.stats.appended.load(Ordering::SeqCst), 0);
        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
        assert!(manager.init().await.is_err());
    }

    #[tokio::test]
    async fn test_append_errors_propagate() {
        let factory = MockStreamFactory {
            responder: Arc::new(|_rows: &ProtoRows| -> Result<AppendRowsResponse> {
                Err(tonic::Status::unavailable("connection reset").into())
            }),
            ..Default::default()
        };
        let manager = manager(factory);
        manager.init().await.unwrap();

        let err = manager.append_and_get(&payload(1)).await.unwrap_err();
        assert_eq!(err.status_code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_responses_are_awaited_outside_the_lock() {
        let gate = Arc::new(Semaphore::new(0));
        let factory = MockStreamFactory {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let manager = Arc::new(manager(factory.clone()));
        manager.init().await.unwrap();

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.append_and_get(&payload(1)).await }
        });
        let second = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.append_and_get(&payload(1)).await }
        });

        // both submissions go through while neither response has arrived
        tokio::time::timeout(Duration::from_secs(5), async {
            while factory.stats.appended.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("second append was blocked by the first one");
        assert!(!first.is_finished());
        assert!(!second.is_finished());

        gate.add_permits(2);
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }
}
