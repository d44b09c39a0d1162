//! Entry point of the sink: converts a batch, appends it to the table stream and reports the
//! outcome of every record.

use std::collections::BTreeMap;

use prost_reflect::DescriptorPool;
use tokio::time::Instant;
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::config::StorageSinkConfig;
use crate::converter::{MessageParser, PayloadConverter, ProtoMessageParser};
use crate::error::{ErrorInfo, ErrorKind, Result};
use crate::message::InputMessage;
use crate::metrics;
use crate::translator::ResponseTranslator;
use crate::writer::grpc::{GrpcSchemaSource, GrpcStreamFactory};
use crate::writer::{SchemaSource, StreamFactory, StreamWriterManager};

/// Outcome of one [StorageSinkClient::push]. Records without an entry were written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkResponse {
    errors: BTreeMap<i64, ErrorInfo>,
}

impl SinkResponse {
    pub fn new(errors: BTreeMap<i64, ErrorInfo>) -> Self {
        Self { errors }
    }

    /// Failed records keyed by their position in the pushed batch.
    pub fn errors(&self) -> &BTreeMap<i64, ErrorInfo> {
        &self.errors
    }

    pub fn into_errors(self) -> BTreeMap<i64, ErrorInfo> {
        self.errors
    }

    pub fn error(&self, input_index: i64) -> Option<&ErrorInfo> {
        self.errors.get(&input_index)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Positions of the records that may be sent again.
    pub fn retryable_indexes(&self) -> Vec<i64> {
        self.errors
            .iter()
            .filter(|(_, error)| error.kind.is_retryable())
            .map(|(index, _)| *index)
            .collect()
    }

    /// Number of failed records per error kind.
    pub fn count_by_kind(&self) -> BTreeMap<ErrorKind, u64> {
        let mut counts = BTreeMap::new();
        for error in self.errors.values() {
            *counts.entry(error.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Writes batches of [InputMessage] into one table. A single client is meant to be shared by
/// every task writing to that table.
pub struct StorageSinkClient<P, F: StreamFactory, S> {
    converter: PayloadConverter<P>,
    manager: StreamWriterManager<F, S>,
    translator: ResponseTranslator,
}

impl StorageSinkClient<ProtoMessageParser, GrpcStreamFactory, GrpcSchemaSource> {
    /// Creates a client talking to the storage write service over `channel`. Input messages are
    /// decoded with the configured message of `pool`.
    pub fn connect(
        config: StorageSinkConfig,
        pool: &DescriptorPool,
        channel: Channel,
    ) -> Result<Self> {
        let parser = ProtoMessageParser::from_pool(pool, &config)?;
        Ok(Self::new(
            config,
            parser,
            GrpcStreamFactory::new(channel.clone()),
            GrpcSchemaSource::new(channel),
        ))
    }
}

impl<P, F, S> StorageSinkClient<P, F, S>
where
    P: MessageParser,
    F: StreamFactory,
    S: SchemaSource,
{
    pub fn new(config: StorageSinkConfig, parser: P, factory: F, schema_source: S) -> Self {
        Self {
            converter: PayloadConverter::new(parser, config.converter),
            manager: StreamWriterManager::new(config.table, factory, schema_source),
            translator: ResponseTranslator::new(config.retryable_codes),
        }
    }

    /// Opens the write stream. Must complete before the first push.
    pub async fn init(&self) -> Result<()> {
        self.manager.init().await
    }

    /// Writes `messages` and reports every record that failed.
    ///
    /// An error is returned only when the batch could not be attempted at all, i.e. the client
    /// was not initialized. Failures of single records and failed appends are reported in the
    /// [SinkResponse].
    pub async fn push(&self, messages: &[InputMessage]) -> Result<SinkResponse> {
        if messages.is_empty() {
            return Ok(SinkResponse::default());
        }

        let table = self.manager.table();
        let start = Instant::now();
        let descriptor = self.manager.wire_descriptor().await?;
        let payload = self.converter.convert(messages, &descriptor);

        let errors = if payload.is_empty() {
            debug!(%table, records = messages.len(), "No valid rows in batch, skipping append");
            payload.conversion_errors()
        } else {
            match self.manager.append_and_get(&payload).await {
                Ok(response) => self.translator.translate(&payload, messages, Ok(&response)),
                Err(error) => {
                    warn!(%table, ?error, "Append failed");
                    self.translator.translate(&payload, messages, Err(&error))
                }
            }
        };

        debug!(
            %table,
            records = messages.len(),
            rows = payload.valid_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pushed batch"
        );
        Ok(self.report(SinkResponse::new(errors), messages.len()))
    }

    /// Closes the write stream. Valid records of later pushes fail with [ErrorKind::Sink4xx].
    pub async fn close(&self) {
        self.manager.close().await
    }

    fn report(&self, response: SinkResponse, records: usize) -> SinkResponse {
        if !response.has_errors() {
            return response;
        }

        let table = self.manager.table();
        let counts = response.count_by_kind();
        for (kind, count) in &counts {
            metrics::record_errors(table, *kind, *count);
        }
        warn!(
            %table,
            records,
            failed = response.errors().len(),
            ?counts,
            "Batch completed with failed records"
        );
        response
    }
}
