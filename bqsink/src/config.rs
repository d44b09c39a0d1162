//! Sink configuration, loaded from environment variables.

use std::collections::{HashMap, HashSet};

use tonic::Code;

use crate::error::{Error, Result};
use crate::schema::TableName;

const ENV_PROJECT_ID: &str = "SINK_BIGQUERY_GOOGLE_CLOUD_PROJECT_ID";
const ENV_DATASET_NAME: &str = "SINK_BIGQUERY_DATASET_NAME";
const ENV_TABLE_NAME: &str = "SINK_BIGQUERY_TABLE_NAME";
const ENV_PARTITIONING_ENABLE: &str = "SINK_BIGQUERY_TABLE_PARTITIONING_ENABLE";
const ENV_PARTITION_KEY: &str = "SINK_BIGQUERY_TABLE_PARTITION_KEY";
const ENV_ADD_METADATA_ENABLED: &str = "SINK_BIGQUERY_ADD_METADATA_ENABLED";
const ENV_METADATA_NAMESPACE: &str = "SINK_BIGQUERY_METADATA_NAMESPACE";
const ENV_METADATA_COLUMNS: &str = "SINK_BIGQUERY_METADATA_COLUMNS";
const ENV_RETRYABLE_ERROR_CODES: &str = "SINK_BIGQUERY_RETRYABLE_ERROR_CODES";
const ENV_MESSAGE_CLASS: &str = "SINK_CONNECTOR_SCHEMA_PROTO_MESSAGE_CLASS";
const ENV_MESSAGE_MODE: &str = "SINK_CONNECTOR_SCHEMA_MESSAGE_MODE";
const ENV_ALLOW_UNKNOWN_FIELDS: &str = "SINK_CONNECTOR_SCHEMA_PROTO_ALLOW_UNKNOWN_FIELDS_ENABLE";

const ENV_KEYS: [&str; 12] = [
    ENV_PROJECT_ID,
    ENV_DATASET_NAME,
    ENV_TABLE_NAME,
    ENV_PARTITIONING_ENABLE,
    ENV_PARTITION_KEY,
    ENV_ADD_METADATA_ENABLED,
    ENV_METADATA_NAMESPACE,
    ENV_METADATA_COLUMNS,
    ENV_RETRYABLE_ERROR_CODES,
    ENV_MESSAGE_CLASS,
    ENV_MESSAGE_MODE,
    ENV_ALLOW_UNKNOWN_FIELDS,
];

const DEFAULT_METADATA_COLUMNS: [&str; 4] = [
    "message_topic",
    "message_partition",
    "message_offset",
    "message_timestamp",
];

/// Which part of the input message holds the protobuf record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageMode {
    #[default]
    LogMessage,
    LogKey,
}

/// Injection of source metadata into each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    /// Record column the metadata is nested under, top-level columns if unset.
    pub namespace: Option<String>,
    /// Metadata keys to inject, each into the column of the same name.
    pub columns: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            columns: DEFAULT_METADATA_COLUMNS
                .iter()
                .map(|column| column.to_string())
                .collect(),
        }
    }
}

/// Settings used while converting records into rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConverterConfig {
    /// Lower-cased partition column. Only set when partitioning is enabled.
    pub partition_key: Option<String>,
    /// Metadata injection, disabled when `None`.
    pub metadata: Option<MetadataConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSinkConfig {
    pub table: TableName,
    /// Fully qualified name of the input protobuf message.
    pub message_class: String,
    pub message_mode: MessageMode,
    pub allow_unknown_fields: bool,
    pub converter: ConverterConfig,
    /// Status codes reported as [crate::ErrorKind::SinkRetryable].
    pub retryable_codes: HashSet<Code>,
}

impl StorageSinkConfig {
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| ENV_KEYS.contains(&key.as_str()))
            .collect();

        let get_var = |var: &str| -> Result<String> {
            env_vars
                .get(var)
                .map(|val| val.trim().to_string())
                .filter(|val| !val.is_empty())
                .ok_or_else(|| Error::Config(format!("Environment variable {var} is not set")))
        };
        let get_bool = |var: &str| -> Result<bool> {
            match get_var(var) {
                Ok(val) => val.parse::<bool>().map_err(|e| {
                    Error::Config(format!("Invalid boolean {val} for {var}: {e}"))
                }),
                Err(_) => Ok(false),
            }
        };

        let table = TableName::new(
            get_var(ENV_PROJECT_ID)?,
            get_var(ENV_DATASET_NAME)?,
            get_var(ENV_TABLE_NAME)?,
        );

        let partition_key = if get_bool(ENV_PARTITIONING_ENABLE)? {
            Some(get_var(ENV_PARTITION_KEY)?.to_lowercase())
        } else {
            None
        };

        let metadata = if get_bool(ENV_ADD_METADATA_ENABLED)? {
            let columns = match get_var(ENV_METADATA_COLUMNS) {
                Ok(columns) => split_list(&columns),
                Err(_) => MetadataConfig::default().columns,
            };
            Some(MetadataConfig {
                namespace: get_var(ENV_METADATA_NAMESPACE).ok(),
                columns,
            })
        } else {
            None
        };

        let message_mode = match get_var(ENV_MESSAGE_MODE).ok().as_deref() {
            None | Some("LOG_MESSAGE") => MessageMode::LogMessage,
            Some("LOG_KEY") => MessageMode::LogKey,
            Some(other) => {
                return Err(Error::Config(format!(
                    "Invalid message mode {other} for {ENV_MESSAGE_MODE}"
                )));
            }
        };

        let retryable_codes = match get_var(ENV_RETRYABLE_ERROR_CODES) {
            Ok(codes) => split_list(&codes)
                .iter()
                .map(|name| {
                    parse_code(name).ok_or_else(|| {
                        Error::Config(format!(
                            "Invalid status code {name} for {ENV_RETRYABLE_ERROR_CODES}"
                        ))
                    })
                })
                .collect::<Result<HashSet<_>>>()?,
            Err(_) => HashSet::new(),
        };

        Ok(Self {
            table,
            message_class: get_var(ENV_MESSAGE_CLASS)?,
            message_mode,
            allow_unknown_fields: get_bool(ENV_ALLOW_UNKNOWN_FIELDS)?,
            converter: ConverterConfig {
                partition_key,
                metadata,
            },
            retryable_codes,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a gRPC status code from its canonical upper-case name.
fn parse_code(name: &str) -> Option<Code> {
    let code = match name.to_uppercase().as_str() {
        "CANCELLED" => Code::Cancelled,
        "UNKNOWN" => Code::Unknown,
        "INVALID_ARGUMENT" => Code::InvalidArgument,
        "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
        "NOT_FOUND" => Code::NotFound,
        "ALREADY_EXISTS" => Code::AlreadyExists,
        "PERMISSION_DENIED" => Code::PermissionDenied,
        "RESOURCE_EXHAUSTED" => Code::ResourceExhausted,
        "FAILED_PRECONDITION" => Code::FailedPrecondition,
        "ABORTED" => Code::Aborted,
        "OUT_OF_RANGE" => Code::OutOfRange,
        "UNIMPLEMENTED" => Code::Unimplemented,
        "INTERNAL" => Code::Internal,
        "UNAVAILABLE" => Code::Unavailable,
        "DATA_LOSS" => Code::DataLoss,
        "UNAUTHENTICATED" => Code::Unauthenticated,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_PROJECT_ID, "proj"),
            (ENV_DATASET_NAME, "ds"),
            (ENV_TABLE_NAME, "events"),
            (ENV_MESSAGE_CLASS, "com.example.Event"),
        ]
    }

    #[test]
    fn test_load_defaults() {
        let config = StorageSinkConfig::load(required_vars()).unwrap();
        assert_eq!(config.table, TableName::new("proj", "ds", "events"));
        assert_eq!(config.message_class, "com.example.Event");
        assert_eq!(config.message_mode, MessageMode::LogMessage);
        assert!(!config.allow_unknown_fields);
        assert_eq!(config.converter, ConverterConfig::default());
        assert!(config.retryable_codes.is_empty());
    }

    #[test]
    fn test_load_full() {
        let mut vars = required_vars();
        vars.extend([
            (ENV_PARTITIONING_ENABLE, "true"),
            (ENV_PARTITION_KEY, "Event_Time"),
            (ENV_ADD_METADATA_ENABLED, "true"),
            (ENV_METADATA_NAMESPACE, "meta"),
            (ENV_METADATA_COLUMNS, "message_topic, message_offset"),
            (ENV_RETRYABLE_ERROR_CODES, "resource_exhausted,ABORTED"),
            (ENV_MESSAGE_MODE, "LOG_KEY"),
            (ENV_ALLOW_UNKNOWN_FIELDS, "true"),
            ("UNRELATED", "ignored"),
        ]);

        let config = StorageSinkConfig::load(vars).unwrap();
        assert_eq!(config.converter.partition_key.as_deref(), Some("event_time"));
        assert_eq!(
            config.converter.metadata,
            Some(MetadataConfig {
                namespace: Some("meta".to_string()),
                columns: vec!["message_topic".to_string(), "message_offset".to_string()],
            })
        );
        assert_eq!(
            config.retryable_codes,
            HashSet::from([Code::ResourceExhausted, Code::Aborted])
        );
        assert_eq!(config.message_mode, MessageMode::LogKey);
        assert!(config.allow_unknown_fields);
    }

    #[test]
    fn test_metadata_default_columns() {
        let mut vars = required_vars();
        vars.push((ENV_ADD_METADATA_ENABLED, "true"));
        let config = StorageSinkConfig::load(vars).unwrap();
        assert_eq!(config.converter.metadata, Some(MetadataConfig::default()));
    }

    #[test]
    fn test_load_errors() {
        let result = StorageSinkConfig::load(vec![(ENV_PROJECT_ID, "proj")]);
        assert!(matches!(result, Err(Error::Config(_))));

        let mut vars = required_vars();
        vars.push((ENV_PARTITIONING_ENABLE, "true"));
        let result = StorageSinkConfig::load(vars);
        assert!(matches!(result, Err(Error::Config(_))));

        let mut vars = required_vars();
        vars.push((ENV_RETRYABLE_ERROR_CODES, "NOT_A_CODE"));
        let result = StorageSinkConfig::load(vars);
        assert!(matches!(result, Err(Error::Config(_))));

        let mut vars = required_vars();
        vars.push((ENV_ALLOW_UNKNOWN_FIELDS, "yes"));
        let result = StorageSinkConfig::load(vars);
        assert!(matches!(result, Err(Error::Config(_))));

        let mut vars = required_vars();
        vars.push((ENV_MESSAGE_MODE, "LOG_EVERYTHING"));
        let result = StorageSinkConfig::load(vars);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
