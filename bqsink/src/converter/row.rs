//! Builds wire rows from parsed messages, field by field, against the destination descriptor.
//!
//! Source fields are matched to destination columns by lower-cased name. Fields without a
//! matching column are dropped. Values are coerced to the column kind, failing the record when
//! the value is out of range for the column or cannot be represented in it.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use prost::Message;
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage, Value,
};

use super::ConversionError;

const TIMESTAMP_TYPE: &str = "google.protobuf.Timestamp";
const STRUCT_TYPE: &str = "google.protobuf.Struct";

/// 0001-01-01T00:00:00Z
const MIN_TIMESTAMP_MICROS: i64 = -62_135_596_800_000_000;
/// 9999-12-31T23:59:59.999999Z
const MAX_TIMESTAMP_MICROS: i64 = 253_402_300_799_999_999;

const PARTITION_PAST_DAYS: i64 = 1825;
const PARTITION_FUTURE_DAYS: i64 = 365;

/// Accepted range of a timestamp column, in microseconds since epoch (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimestampWindow {
    min: i64,
    max: i64,
}

impl TimestampWindow {
    pub(crate) const ABSOLUTE: TimestampWindow = TimestampWindow {
        min: MIN_TIMESTAMP_MICROS,
        max: MAX_TIMESTAMP_MICROS,
    };

    /// Window accepted for the partition column, relative to `now`.
    pub(crate) fn partition(now: DateTime<Utc>) -> Self {
        let min = now - TimeDelta::days(PARTITION_PAST_DAYS);
        let max = now + TimeDelta::days(PARTITION_FUTURE_DAYS);
        Self {
            min: min.timestamp_micros(),
            max: max.timestamp_micros(),
        }
    }

    pub(crate) fn check(&self, field: &str, micros: i64) -> Result<i64, ConversionError> {
        if micros < self.min || micros > self.max {
            return Err(ConversionError::InvalidValue {
                field: field.to_string(),
                reason: format!(
                    "timestamp {} is outside of [{}, {}]",
                    format_micros(micros),
                    format_micros(self.min),
                    format_micros(self.max)
                ),
            });
        }
        Ok(micros)
    }
}

fn format_micros(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| format!("{micros}us"))
}

/// A row under construction for one destination message type.
#[derive(Debug)]
pub(crate) struct RowBuilder {
    row: DynamicMessage,
}

impl RowBuilder {
    pub(crate) fn new(target: MessageDescriptor) -> Self {
        Self {
            row: DynamicMessage::new(target),
        }
    }

    pub(crate) fn descriptor(&self) -> MessageDescriptor {
        self.row.descriptor()
    }

    pub(crate) fn set(&mut self, column: &FieldDescriptor, value: Value) -> Result<(), ConversionError> {
        self.row
            .try_set_field(column, value)
            .map_err(|e| ConversionError::Serialize {
                field: column.name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Serializes the row in the wire format.
    pub(crate) fn build(self) -> Bytes {
        Bytes::from(self.row.encode_to_vec())
    }

    pub(crate) fn into_message(self) -> DynamicMessage {
        self.row
    }
}

/// Converts parsed messages into rows. Built once per batch so every record in the batch is
/// checked against the same partition window.
pub(crate) struct RowConverter<'a> {
    partition_key: Option<&'a str>,
    partition_window: TimestampWindow,
}

impl<'a> RowConverter<'a> {
    pub(crate) fn new(partition_key: Option<&'a str>, now: DateTime<Utc>) -> Self {
        Self {
            partition_key,
            partition_window: TimestampWindow::partition(now),
        }
    }

    /// Builds the top-level row for `source`.
    pub(crate) fn convert(
        &self,
        source: &DynamicMessage,
        target: &MessageDescriptor,
    ) -> Result<RowBuilder, ConversionError> {
        self.convert_message(source, target, true)
    }

    fn convert_message(
        &self,
        source: &DynamicMessage,
        target: &MessageDescriptor,
        top_level: bool,
    ) -> Result<RowBuilder, ConversionError> {
        let mut row = RowBuilder::new(target.clone());
        for (field, value) in source.fields() {
            let Some(column) = target.get_field_by_name(&field.name().to_lowercase()) else {
                continue;
            };
            let is_partition = top_level && self.partition_key == Some(column.name());
            let converted = self.convert_field(&field, value, &column, is_partition)?;
            row.set(&column, converted)?;
        }
        Ok(row)
    }

    fn convert_field(
        &self,
        field: &FieldDescriptor,
        value: &Value,
        column: &FieldDescriptor,
        is_partition: bool,
    ) -> Result<Value, ConversionError> {
        match value {
            Value::Map(entries) => self.convert_map(field, entries, column),
            Value::List(items) => {
                if !column.is_list() {
                    return Err(mismatch(column, "repeated value for a non-repeated column"));
                }
                let kind = field.kind();
                items
                    .iter()
                    .map(|item| self.convert_value(&kind, item, column, false))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            single => {
                if column.is_list() {
                    return Err(mismatch(column, "single value for a repeated column"));
                }
                self.convert_value(&field.kind(), single, column, is_partition)
            }
        }
    }

    /// Map entries become key/value records of a repeated column.
    fn convert_map(
        &self,
        field: &FieldDescriptor,
        entries: &HashMap<MapKey, Value>,
        column: &FieldDescriptor,
    ) -> Result<Value, ConversionError> {
        let (Kind::Message(source_entry), Kind::Message(target_entry), true) =
            (field.kind(), column.kind(), column.is_list())
        else {
            return Err(mismatch(column, "map value for a column that is not a repeated record"));
        };
        let key_field = source_entry.map_entry_key_field();
        let value_field = source_entry.map_entry_value_field();
        let key_column = target_entry.get_field_by_name(key_field.name());
        let value_column = target_entry.get_field_by_name(value_field.name());

        let mut rows = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let mut entry = RowBuilder::new(target_entry.clone());
            if let Some(key_column) = &key_column {
                let key = Value::from(key.clone());
                let key = self.convert_value(&key_field.kind(), &key, key_column, false)?;
                entry.set(key_column, key)?;
            }
            if let Some(value_column) = &value_column {
                let value = self.convert_value(&value_field.kind(), value, value_column, false)?;
                entry.set(value_column, value)?;
            }
            rows.push(Value::Message(entry.into_message()));
        }
        Ok(Value::List(rows))
    }

    fn convert_value(
        &self,
        source_kind: &Kind,
        value: &Value,
        column: &FieldDescriptor,
        is_partition: bool,
    ) -> Result<Value, ConversionError> {
        match value {
            Value::Message(message) => self.convert_nested(message, column, is_partition),
            Value::EnumNumber(number) => {
                if column.kind() == Kind::String {
                    let name = match source_kind {
                        Kind::Enum(descriptor) => descriptor
                            .get_value(*number)
                            .map(|value| value.name().to_string()),
                        _ => None,
                    };
                    Ok(Value::String(name.unwrap_or_else(|| number.to_string())))
                } else {
                    coerce_scalar(&Value::I32(*number), column)
                }
            }
            scalar => coerce_scalar(scalar, column),
        }
    }

    fn convert_nested(
        &self,
        message: &DynamicMessage,
        column: &FieldDescriptor,
        is_partition: bool,
    ) -> Result<Value, ConversionError> {
        match message.descriptor().full_name() {
            TIMESTAMP_TYPE => {
                let timestamp = message.transcode_to::<prost_types::Timestamp>()?;
                let micros = timestamp
                    .seconds
                    .checked_mul(1_000_000)
                    .and_then(|micros| micros.checked_add(i64::from(timestamp.nanos / 1_000)))
                    .ok_or_else(|| ConversionError::InvalidValue {
                        field: column.name().to_string(),
                        reason: format!("timestamp {}s overflows", timestamp.seconds),
                    })?;
                let window = if is_partition {
                    self.partition_window
                } else {
                    TimestampWindow::ABSOLUTE
                };
                coerce_scalar(&Value::I64(window.check(column.name(), micros)?), column)
            }
            STRUCT_TYPE => {
                let json = serde_json::to_string(message).map_err(|e| ConversionError::Serialize {
                    field: column.name().to_string(),
                    reason: e.to_string(),
                })?;
                coerce_scalar(&Value::String(json), column)
            }
            _ => match column.kind() {
                Kind::Message(target) => Ok(Value::Message(
                    self.convert_message(message, &target, false)?
                        .into_message(),
                )),
                _ => Err(mismatch(column, "record value for a scalar column")),
            },
        }
    }
}

/// Coerces a scalar value to the kind of `column`.
pub(crate) fn coerce_scalar(value: &Value, column: &FieldDescriptor) -> Result<Value, ConversionError> {
    if let Some(float) = as_f64(value) {
        if !float.is_finite() {
            return Err(ConversionError::InvalidValue {
                field: column.name().to_string(),
                reason: format!("{float} is not a finite number"),
            });
        }
    }

    let coerced = match column.kind() {
        Kind::Double => as_f64(value)
            .or_else(|| as_i128(value).map(|int| int as f64))
            .map(Value::F64),
        Kind::Float => as_f64(value)
            .or_else(|| as_i128(value).map(|int| int as f64))
            .map(|float| Value::F32(float as f32)),
        Kind::Bool => value.as_bool().map(Value::Bool),
        Kind::String => match value {
            Value::String(text) => Some(Value::String(text.clone())),
            Value::F32(_) | Value::F64(_) => as_f64(value).map(|float| Value::String(float.to_string())),
            _ => as_i128(value).map(|int| Value::String(int.to_string())),
        },
        Kind::Bytes => match value {
            Value::Bytes(bytes) => Some(Value::Bytes(bytes.clone())),
            Value::String(text) => Some(Value::Bytes(Bytes::from(text.clone().into_bytes()))),
            _ => None,
        },
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => narrow(value, column, i64::try_from, Value::I64)?,
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => narrow(value, column, i32::try_from, Value::I32)?,
        Kind::Uint64 | Kind::Fixed64 => narrow(value, column, u64::try_from, Value::U64)?,
        Kind::Uint32 | Kind::Fixed32 => narrow(value, column, u32::try_from, Value::U32)?,
        Kind::Message(_) | Kind::Enum(_) => None,
    };

    coerced.ok_or_else(|| {
        mismatch(
            column,
            &format!("cannot store {value:?} in a {:?} column", column.kind()),
        )
    })
}

/// Widens `value` and checks it fits the integer column.
fn narrow<T, E>(
    value: &Value,
    column: &FieldDescriptor,
    convert: impl Fn(i128) -> Result<T, E>,
    wrap: impl Fn(T) -> Value,
) -> Result<Option<Value>, ConversionError> {
    let Some(wide) = as_i128(value) else {
        return Ok(None);
    };
    convert(wide)
        .map(|narrowed| Some(wrap(narrowed)))
        .map_err(|_| ConversionError::InvalidValue {
            field: column.name().to_string(),
            reason: format!("{wide} is out of range for a {:?} column", column.kind()),
        })
}

fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::I32(int) => Some(i128::from(*int)),
        Value::I64(int) => Some(i128::from(*int)),
        Value::U32(int) => Some(i128::from(*int)),
        Value::U64(int) => Some(i128::from(*int)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        // widen through the shortest decimal form so 0.1f32 stays 0.1
        Value::F32(float) => Some(float.to_string().parse().unwrap_or(f64::from(*float))),
        Value::F64(float) => Some(*float),
        _ => None,
    }
}

fn mismatch(column: &FieldDescriptor, reason: &str) -> ConversionError {
    ConversionError::TypeMismatch {
        field: column.name().to_string(),
        reason: reason.to_string(),
    }
}
