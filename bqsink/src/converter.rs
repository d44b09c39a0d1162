//! Converts a batch of input messages into an [IndexedPayload].
//!
//! Every message is converted on its own. A failure is recorded against the input position of
//! the message and never aborts the batch, so the payload always carries exactly one
//! [crate::payload::RecordOutcome] per input message.

use bytes::Bytes;
use chrono::Utc;
use prost_reflect::{Kind, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{ConverterConfig, MetadataConfig};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::{InputMessage, MetadataValue};
use crate::payload::IndexedPayload;
use crate::schema::WireDescriptor;

pub mod parser;
pub use parser::{MessageParser, ProtoMessageParser};

mod row;
use row::{RowBuilder, RowConverter, TimestampWindow, coerce_scalar};

/// Why a single message could not be turned into a row.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("message {message} has unknown fields in {paths}")]
    UnknownFields { message: String, paths: String },

    #[error("message payload is empty")]
    EmptyMessage,

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to decode message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("cannot convert {field}: {reason}")]
    TypeMismatch { field: String, reason: String },

    #[error("failed to serialize {field}: {reason}")]
    Serialize { field: String, reason: String },
}

/// Maps a conversion failure to the kind reported for the record.
pub fn classify(error: &ConversionError) -> ErrorKind {
    match error {
        ConversionError::UnknownFields { .. } => ErrorKind::UnknownFields,
        ConversionError::EmptyMessage | ConversionError::InvalidValue { .. } => {
            ErrorKind::InvalidMessage
        }
        ConversionError::Decode(_)
        | ConversionError::TypeMismatch { .. }
        | ConversionError::Serialize { .. } => ErrorKind::Deserialization,
    }
}

/// Builds wire rows for the destination table out of input messages.
pub struct PayloadConverter<P> {
    parser: P,
    config: ConverterConfig,
}

impl<P: MessageParser> PayloadConverter<P> {
    pub fn new(parser: P, config: ConverterConfig) -> Self {
        Self { parser, config }
    }

    /// Converts `messages` into rows of `descriptor`. Never fails, per-message failures are
    /// recorded in the returned payload.
    pub fn convert(&self, messages: &[InputMessage], descriptor: &WireDescriptor) -> IndexedPayload {
        let converter = RowConverter::new(self.config.partition_key.as_deref(), Utc::now());
        let mut payload = IndexedPayload::with_capacity(messages.len());

        for (input_index, message) in messages.iter().enumerate() {
            let input_index = input_index as i64;
            match self.convert_message(&converter, message, descriptor) {
                Ok(row) => payload.push_valid(input_index, row),
                Err(error) => {
                    let kind = classify(&error);
                    debug!(input_index, %kind, %error, "Failed to convert message");
                    payload.push_invalid(input_index, ErrorInfo::new(error.to_string(), kind));
                }
            }
        }

        payload
    }

    fn convert_message(
        &self,
        converter: &RowConverter<'_>,
        message: &InputMessage,
        descriptor: &WireDescriptor,
    ) -> Result<Bytes, ConversionError> {
        let parsed = self.parser.parse(message)?;
        let mut row = converter.convert(&parsed, descriptor.message())?;
        if let Some(metadata) = &self.config.metadata {
            inject_metadata(&mut row, metadata, message)?;
        }
        Ok(row.build())
    }
}

/// Writes the configured metadata of `message` into the row, nested under the namespace
/// column when one is configured.
fn inject_metadata(
    row: &mut RowBuilder,
    config: &MetadataConfig,
    message: &InputMessage,
) -> Result<(), ConversionError> {
    let Some(namespace) = &config.namespace else {
        return set_metadata_columns(row, &config.columns, message);
    };

    let Some(column) = row.descriptor().get_field_by_name(&namespace.to_lowercase()) else {
        return Ok(());
    };
    let Kind::Message(target) = column.kind() else {
        return Err(ConversionError::TypeMismatch {
            field: column.name().to_string(),
            reason: "metadata namespace column is not a record".to_string(),
        });
    };
    if column.is_list() {
        return Err(ConversionError::TypeMismatch {
            field: column.name().to_string(),
            reason: "metadata namespace column is repeated".to_string(),
        });
    }

    let mut nested = RowBuilder::new(target);
    set_metadata_columns(&mut nested, &config.columns, message)?;
    row.set(&column, Value::Message(nested.into_message()))
}

fn set_metadata_columns(
    row: &mut RowBuilder,
    columns: &[String],
    message: &InputMessage,
) -> Result<(), ConversionError> {
    let target = row.descriptor();
    for name in columns {
        let (Some(value), Some(column)) = (
            message.metadata.get(name),
            target.get_field_by_name(&name.to_lowercase()),
        ) else {
            continue;
        };
        let value = match value {
            MetadataValue::String(text) => Value::String(text.clone()),
            MetadataValue::Integer(int) => Value::I64(*int),
            MetadataValue::Timestamp(ts) => {
                Value::I64(TimestampWindow::ABSOLUTE.check(name, ts.timestamp_micros())?)
            }
        };
        let value = coerce_scalar(&value, &column)?;
        row.set(&column, value)?;
    }
    Ok(())
}
