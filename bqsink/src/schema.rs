//! Converts the destination table schema into the protobuf descriptor rows are serialized with.

use std::fmt;

use bqsink_pb::storage::table_field_schema::{Mode, Type};
use bqsink_pb::storage::{ProtoSchema, TableFieldSchema, TableSchema};
use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type as FieldType};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};

use crate::error::{Error, Result};

const SCHEMA_FILE_NAME: &str = "bqsink_table_schema.proto";
const ROOT_MESSAGE_NAME: &str = "__ROOT__";
const NESTED_MESSAGE_PREFIX: &str = "Struct_";

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableName {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Resource path of the table.
    pub fn path(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}",
            self.project, self.dataset, self.table
        )
    }

    /// Resource path of the table's default write stream.
    pub fn default_stream(&self) -> String {
        format!("{}/streams/_default", self.path())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Descriptor of the rows written to a stream, derived from the remote table schema.
///
/// `proto` is the self-contained descriptor sent to the service as the writer schema and
/// `message` is the same descriptor resolved for building rows.
#[derive(Debug, Clone)]
pub struct WireDescriptor {
    proto: DescriptorProto,
    message: MessageDescriptor,
}

impl WireDescriptor {
    pub fn from_table_schema(schema: &TableSchema) -> Result<Self> {
        if schema.fields.is_empty() {
            return Err(Error::Schema("table schema has no fields".to_string()));
        }

        let proto = build_message(ROOT_MESSAGE_NAME, "", &schema.fields)?;
        let file = FileDescriptorProto {
            name: Some(SCHEMA_FILE_NAME.to_string()),
            syntax: Some("proto2".to_string()),
            message_type: vec![proto.clone()],
            ..Default::default()
        };

        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
            .map_err(|e| Error::Schema(format!("invalid descriptor for table schema: {e}")))?;
        let message = pool
            .get_message_by_name(ROOT_MESSAGE_NAME)
            .ok_or_else(|| Error::Schema("root message missing from descriptor".to_string()))?;

        Ok(Self { proto, message })
    }

    pub fn message(&self) -> &MessageDescriptor {
        &self.message
    }

    /// The writer schema sent with the first append of a connection.
    pub fn proto_schema(&self) -> ProtoSchema {
        ProtoSchema {
            proto_descriptor: Some(self.proto.clone()),
        }
    }
}

fn build_message(
    name: &str,
    scope: &str,
    columns: &[TableFieldSchema],
) -> Result<DescriptorProto> {
    let full_name = format!("{scope}.{name}");
    let mut message = DescriptorProto {
        name: Some(name.to_string()),
        ..Default::default()
    };

    for (position, column) in columns.iter().enumerate() {
        let column_name = column.name.to_lowercase();
        let number = i32::try_from(position + 1)
            .map_err(|_| Error::Schema(format!("too many columns in {full_name}")))?;
        let column_type = Type::try_from(column.r#type).map_err(|_| {
            Error::Schema(format!(
                "unknown type {} for column {column_name}",
                column.r#type
            ))
        })?;
        let label = match Mode::try_from(column.mode).unwrap_or(Mode::Nullable) {
            Mode::Repeated => Label::Repeated,
            Mode::Required => Label::Required,
            Mode::Nullable | Mode::Unspecified => Label::Optional,
        };

        let mut field = FieldDescriptorProto {
            name: Some(column_name.clone()),
            number: Some(number),
            label: Some(label as i32),
            ..Default::default()
        };

        if column_type == Type::Struct {
            if column.fields.is_empty() {
                return Err(Error::Schema(format!(
                    "record column {column_name} has no fields"
                )));
            }
            let nested_name = format!("{NESTED_MESSAGE_PREFIX}{column_name}");
            message
                .nested_type
                .push(build_message(&nested_name, &full_name, &column.fields)?);
            field.r#type = Some(FieldType::Message as i32);
            field.type_name = Some(format!("{full_name}.{nested_name}"));
        } else {
            field.r#type = Some(scalar_type(column_type, &column_name)? as i32);
        }

        message.field.push(field);
    }

    Ok(message)
}

/// Proto type used on the wire for each column type.
fn scalar_type(column_type: Type, column_name: &str) -> Result<FieldType> {
    let field_type = match column_type {
        Type::Bool => FieldType::Bool,
        Type::Bytes => FieldType::Bytes,
        Type::Date => FieldType::Int32,
        Type::Int64 | Type::Timestamp | Type::Datetime | Type::Time => FieldType::Int64,
        Type::Double => FieldType::Double,
        Type::String
        | Type::Numeric
        | Type::Bignumeric
        | Type::Geography
        | Type::Json
        | Type::Interval => FieldType::String,
        Type::Struct | Type::Range | Type::Unspecified => {
            return Err(Error::Schema(format!(
                "unsupported type {} for column {column_name}",
                column_type.as_str_name()
            )));
        }
    };
    Ok(field_type)
}
