//! Sink writing protobuf records into a BigQuery table through the Storage Write API.
//!
//! A batch flows through three stages, driven by [StorageSinkClient::push]:
//! - [PayloadConverter] turns every input message into a row of the table, recording per-record
//!   failures without aborting the batch.
//! - [StreamWriterManager] appends the rows to the single write stream of the table, recreating
//!   the stream when the table schema changes.
//! - [ResponseTranslator] maps the append outcome back to positions in the input batch.
//!
//! The caller decides what to do with failed records, see [ErrorKind::is_retryable].

pub use crate::error::{Error, ErrorInfo, ErrorKind, Result};

mod error;

pub mod client;
pub use client::{SinkResponse, StorageSinkClient};

pub mod config;
pub use config::StorageSinkConfig;

pub mod converter;
pub use converter::PayloadConverter;

pub mod message;
pub use message::{InputMessage, MetadataValue};

pub mod metrics;
pub use metrics::encode_metrics;

pub mod payload;
pub use payload::{IndexedPayload, RecordOutcome};

pub mod schema;
pub use schema::{TableName, WireDescriptor};

pub mod translator;
pub use translator::ResponseTranslator;

pub mod writer;
pub use writer::StreamWriterManager;
