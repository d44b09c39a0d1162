//! Schema source and write streams backed by the BigQuery Storage Write API.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bqsink_pb::storage::append_rows_request::{ProtoData, Rows};
use bqsink_pb::storage::big_query_write_client::BigQueryWriteClient;
use bqsink_pb::storage::{
    AppendRowsRequest, AppendRowsResponse, GetWriteStreamRequest, ProtoRows, ProtoSchema,
    TableSchema, WriteStreamView,
};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::{Code, Request, Status};
use tracing::{debug, error, warn};

use super::{AppendFuture, SchemaSource, StreamFactory, StreamHandle};
use crate::error::{Error, Result};
use crate::schema::{TableName, WireDescriptor};

const REQUEST_PARAMS_HEADER: &str = "x-goog-request-params";
const DEFAULT_CHANNEL_SIZE: usize = 100;
/// Largest serialized row the service accepts.
const MAX_ROW_BYTES: usize = 10 * 1024 * 1024;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

fn routing_header(stream_name: &str) -> Result<MetadataValue<tonic::metadata::Ascii>> {
    MetadataValue::try_from(format!("write_stream={stream_name}"))
        .map_err(|e| Error::Stream(format!("invalid routing header for {stream_name}: {e}")))
}

/// Reads the table schema from the default stream of the table.
#[derive(Debug, Clone)]
pub struct GrpcSchemaSource {
    client: BigQueryWriteClient<Channel>,
}

impl GrpcSchemaSource {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: BigQueryWriteClient::new(channel),
        }
    }
}

impl SchemaSource for GrpcSchemaSource {
    async fn current_schema(&self, table: &TableName) -> Result<TableSchema> {
        let stream_name = table.default_stream();
        let mut request = Request::new(GetWriteStreamRequest {
            name: stream_name.clone(),
            view: WriteStreamView::Full as i32,
        });
        request
            .metadata_mut()
            .insert(REQUEST_PARAMS_HEADER, routing_header(&stream_name)?);

        let stream = self
            .client
            .clone()
            .get_write_stream(request)
            .await?
            .into_inner();
        stream
            .table_schema
            .ok_or_else(|| Error::Schema(format!("no table schema returned for {table}")))
    }
}

/// Opens one `AppendRows` connection per stream.
#[derive(Debug, Clone)]
pub struct GrpcStreamFactory {
    client: BigQueryWriteClient<Channel>,
    channel_size: usize,
}

impl GrpcStreamFactory {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: BigQueryWriteClient::new(channel),
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }

    /// Number of submissions that can be buffered before the service reads them.
    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.channel_size = channel_size;
        self
    }
}

impl StreamFactory for GrpcStreamFactory {
    type Handle = GrpcStreamHandle;

    async fn open(&self, table: &TableName, descriptor: &WireDescriptor) -> Result<GrpcStreamHandle> {
        let stream_name = table.default_stream();
        let (requests_tx, requests_rx) = mpsc::channel(self.channel_size);
        let mut request = Request::new(ReceiverStream::new(requests_rx));
        request
            .metadata_mut()
            .insert(REQUEST_PARAMS_HEADER, routing_header(&stream_name)?);

        let inflight = Arc::new(Inflight::default());
        // the call only resolves once the service answers, which it does after the first
        // request, so it is driven by the response task
        let task = tokio::spawn({
            let mut client = self.client.clone();
            let inflight = Arc::clone(&inflight);
            let stream_name = stream_name.clone();
            async move {
                match client.append_rows(request).await {
                    Ok(response) => read_responses(response.into_inner(), &inflight).await,
                    Err(status) => {
                        error!(stream = %stream_name, ?status, "Failed to open append stream");
                        inflight.fail(status);
                    }
                }
            }
        });

        Ok(GrpcStreamHandle {
            requests: RequestBuilder::new(stream_name, descriptor.proto_schema()),
            requests_tx: Some(requests_tx),
            inflight,
            task: Some(task),
        })
    }
}

/// Submissions waiting for their response, in submission order.
#[derive(Default)]
struct Inflight {
    state: parking_lot::Mutex<InflightState>,
}

#[derive(Default)]
struct InflightState {
    pending: VecDeque<oneshot::Sender<Result<AppendRowsResponse>>>,
    /// Status the stream terminated with.
    terminated: Option<Status>,
    updated_schema: Option<TableSchema>,
}

impl Inflight {
    fn register(&self) -> Result<oneshot::Receiver<Result<AppendRowsResponse>>> {
        let mut state = self.state.lock();
        if let Some(status) = &state.terminated {
            return Err(status.clone().into());
        }
        let (tx, rx) = oneshot::channel();
        state.pending.push_back(tx);
        Ok(rx)
    }

    fn complete(&self, response: AppendRowsResponse) {
        let mut state = self.state.lock();
        if let Some(schema) = response
            .updated_schema
            .as_ref()
            .filter(|schema| !schema.fields.is_empty())
        {
            state.updated_schema = Some(schema.clone());
        }
        match state.pending.pop_front() {
            Some(tx) => {
                let _ = tx.send(Ok(response));
            }
            None => warn!("Received an append response without a pending submission"),
        }
    }

    /// Terminates the stream and fails every pending submission with `status`.
    fn fail(&self, status: Status) {
        let mut state = self.state.lock();
        for tx in state.pending.drain(..) {
            let _ = tx.send(Err(status.clone().into()));
        }
        if state.terminated.is_none() {
            state.terminated = Some(status);
        }
    }

    fn is_terminated(&self) -> bool {
        self.state.lock().terminated.is_some()
    }

    fn updated_schema(&self) -> Option<TableSchema> {
        self.state.lock().updated_schema.clone()
    }
}

async fn read_responses<S>(mut responses: S, inflight: &Inflight)
where
    S: Stream<Item = std::result::Result<AppendRowsResponse, Status>> + Unpin,
{
    while let Some(response) = responses.next().await {
        match response {
            Ok(response) => inflight.complete(response),
            Err(status) => {
                warn!(?status, "Append stream failed");
                inflight.fail(status);
                return;
            }
        }
    }
    debug!("Append stream ended");
    inflight.fail(Status::unavailable("append stream ended"));
}

/// Builds the requests of one connection. Only the first carries the stream name and the writer
/// schema.
struct RequestBuilder {
    stream_name: String,
    writer_schema: ProtoSchema,
    first: bool,
}

impl RequestBuilder {
    fn new(stream_name: String, writer_schema: ProtoSchema) -> Self {
        Self {
            stream_name,
            writer_schema,
            first: true,
        }
    }

    fn next(&mut self, rows: ProtoRows) -> AppendRowsRequest {
        let first = std::mem::replace(&mut self.first, false);
        AppendRowsRequest {
            write_stream: if first {
                self.stream_name.clone()
            } else {
                String::new()
            },
            rows: Some(Rows::ProtoRows(ProtoData {
                writer_schema: first.then(|| self.writer_schema.clone()),
                rows: Some(rows),
            })),
            ..Default::default()
        }
    }
}

/// Rejects rows the service would refuse for their size, keyed by row position.
fn check_row_sizes(rows: &ProtoRows) -> Result<()> {
    let row_errors: BTreeMap<i64, String> = rows
        .serialized_rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.len() > MAX_ROW_BYTES)
        .map(|(index, row)| {
            (
                index as i64,
                format!(
                    "row of {} bytes exceeds the {MAX_ROW_BYTES} bytes limit",
                    row.len()
                ),
            )
        })
        .collect();
    if row_errors.is_empty() {
        return Ok(());
    }
    Err(Error::AppendSerialization {
        code: Code::InvalidArgument,
        message: format!("{} rows exceed the row size limit", row_errors.len()),
        row_errors,
    })
}

/// One `AppendRows` connection. Responses are matched to submissions in order.
pub struct GrpcStreamHandle {
    requests: RequestBuilder,
    requests_tx: Option<mpsc::Sender<AppendRowsRequest>>,
    inflight: Arc<Inflight>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle for GrpcStreamHandle {
    async fn append(&mut self, rows: ProtoRows) -> Result<AppendFuture> {
        check_row_sizes(&rows)?;
        let Some(requests_tx) = &self.requests_tx else {
            return Err(Error::Stream("append stream is closed".to_string()));
        };

        let response_rx = self.inflight.register()?;
        requests_tx
            .send(self.requests.next(rows))
            .await
            .map_err(|e| Error::Stream(format!("failed to submit rows: {e}")))?;

        Ok(Box::pin(async move {
            response_rx
                .await
                .map_err(|e| Error::ActorPatternRecv(format!("append response dropped: {e}")))?
        }))
    }

    fn updated_schema(&self) -> Option<TableSchema> {
        self.inflight.updated_schema()
    }

    fn is_closed(&self) -> bool {
        self.inflight.is_terminated()
    }

    async fn close(&mut self) {
        // ending the request stream lets the service finish pending appends and hang up
        self.requests_tx.take();
        let Some(task) = self.task.take() else {
            return;
        };
        let abort = task.abort_handle();
        if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
            warn!("Append stream did not shut down in time, aborting");
            abort.abort();
            self.inflight
                .fail(Status::cancelled("append stream was closed"));
        }
    }
}

impl Drop for GrpcStreamHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use bqsink_pb::storage::append_rows_response::{AppendResult, Response};
    use bqsink_pb::storage::table_field_schema::{Mode, Type};
    use bytes::Bytes;

    use super::*;
    use crate::schema::test_utils::{column, table_schema};

    fn success(offset: i64) -> AppendRowsResponse {
        AppendRowsResponse {
            response: Some(Response::AppendResult(AppendResult {
                offset: Some(offset),
            })),
            ..Default::default()
        }
    }

    fn rows(sizes: &[usize]) -> ProtoRows {
        ProtoRows {
            serialized_rows: sizes.iter().map(|size| Bytes::from(vec![0u8; *size])).collect(),
        }
    }

    #[test]
    fn test_first_request_carries_stream_and_schema() {
        let schema = table_schema(vec![column("id", Type::String, Mode::Required)]);
        let descriptor = WireDescriptor::from_table_schema(&schema).unwrap();
        let mut requests = RequestBuilder::new(
            "projects/p/datasets/d/tables/t/streams/_default".to_string(),
            descriptor.proto_schema(),
        );

        let first = requests.next(rows(&[1]));
        assert_eq!(first.write_stream, "projects/p/datasets/d/tables/t/streams/_default");
        let Some(Rows::ProtoRows(data)) = first.rows else {
            panic!("expected proto rows");
        };
        assert!(data.writer_schema.is_some());
        assert_eq!(data.rows.unwrap().serialized_rows.len(), 1);

        let second = requests.next(rows(&[1, 2]));
        assert!(second.write_stream.is_empty());
        let Some(Rows::ProtoRows(data)) = second.rows else {
            panic!("expected proto rows");
        };
        assert!(data.writer_schema.is_none());
    }

    #[test]
    fn test_oversized_rows_rejected() {
        assert!(check_row_sizes(&rows(&[10, MAX_ROW_BYTES])).is_ok());

        let err = check_row_sizes(&rows(&[10, MAX_ROW_BYTES + 1, 10, MAX_ROW_BYTES + 5])).unwrap_err();
        assert_eq!(err.status_code(), Code::InvalidArgument);
        let Error::AppendSerialization { row_errors, .. } = err else {
            panic!("expected serialization error");
        };
        assert_eq!(row_errors.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_responses_complete_submissions_in_order() {
        let inflight = Inflight::default();
        let first = inflight.register().unwrap();
        let second = inflight.register().unwrap();

        let mut drifted = success(1);
        drifted.updated_schema = Some(table_schema(vec![column("id", Type::String, Mode::Required)]));
        let responses = futures::stream::iter(vec![Ok(success(0)), Ok(drifted)]);
        read_responses(responses, &inflight).await;

        let first = first.await.unwrap().unwrap();
        assert!(matches!(
            first.response,
            Some(Response::AppendResult(AppendResult { offset: Some(0) }))
        ));
        assert!(second.await.unwrap().unwrap().updated_schema.is_some());
        assert!(inflight.updated_schema().is_some());
        // the response stream ended
        assert!(inflight.is_terminated());
        assert!(inflight.register().is_err());
    }

    #[tokio::test]
    async fn test_stream_failure_fails_pending_submissions() {
        let inflight = Inflight::default();
        let pending = inflight.register().unwrap();

        let responses = futures::stream::iter(vec![Err(Status::unavailable("goaway"))]);
        read_responses(responses, &inflight).await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.status_code(), Code::Unavailable);
        assert!(inflight.is_terminated());
        assert!(inflight.updated_schema().is_none());

        let err = inflight.register().unwrap_err();
        assert_eq!(err.status_code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_empty_updated_schema_is_ignored() {
        let inflight = Inflight::default();
        let _pending = inflight.register().unwrap();
        let mut response = success(0);
        response.updated_schema = Some(TableSchema::default());
        inflight.complete(response);
        assert!(inflight.updated_schema().is_none());
        assert!(!inflight.is_terminated());
    }
}
