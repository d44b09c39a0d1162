//! Prometheus metrics for the write path, kept in a process wide registry. Embedders expose
//! them with [encode_metrics].

use std::sync::OnceLock;
use std::time::Duration;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::error::ErrorKind;
use crate::schema::TableName;

const REGISTRY_PREFIX: &str = "bqsink";

const STREAM_OPERATION: &str = "stream_operation";
const STREAM_OPERATION_TIME: &str = "stream_operation_time";
const APPEND_BYTES: &str = "append_bytes";
const APPEND_ROWS: &str = "append_rows";
const RECORD_ERRORS: &str = "record_errors";

const PROJECT_LABEL: &str = "project";
const DATASET_LABEL: &str = "dataset";
const TABLE_LABEL: &str = "table";
const OPERATION_LABEL: &str = "operation";
const ERROR_TYPE_LABEL: &str = "error_type";

/// Stream operations that are counted and timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    CreateStream,
    Append,
    CloseStream,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateStream => "create_stream",
            Operation::Append => "append",
            Operation::CloseStream => "close_stream",
        }
    }
}

/// The global register of all metrics.
struct GlobalRegistry {
    // registration happens once, a blocking mutex is enough
    registry: parking_lot::Mutex<Registry>,
}

impl GlobalRegistry {
    fn new() -> Self {
        GlobalRegistry {
            registry: parking_lot::Mutex::new(Registry::with_prefix(REGISTRY_PREFIX)),
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::new)
}

pub(crate) struct SinkMetrics {
    pub(crate) stream_operation: Family<Vec<(String, String)>, Counter>,
    /// milliseconds
    pub(crate) stream_operation_time: Family<Vec<(String, String)>, Histogram>,
    pub(crate) append_bytes: Family<Vec<(String, String)>, Counter>,
    pub(crate) append_rows: Family<Vec<(String, String)>, Counter>,
    pub(crate) record_errors: Family<Vec<(String, String)>, Counter>,
}

impl SinkMetrics {
    fn new() -> Self {
        let metrics = Self {
            stream_operation: Family::<Vec<(String, String)>, Counter>::default(),
            // 1ms up to ~65s
            stream_operation_time: Family::<Vec<(String, String)>, Histogram>::new_with_constructor(
                || Histogram::new(exponential_buckets(1.0, 2.0, 17)),
            ),
            append_bytes: Family::<Vec<(String, String)>, Counter>::default(),
            append_rows: Family::<Vec<(String, String)>, Counter>::default(),
            record_errors: Family::<Vec<(String, String)>, Counter>::default(),
        };

        let mut registry = global_registry().registry.lock();
        registry.register(
            STREAM_OPERATION,
            "Total number of stream operations by type",
            metrics.stream_operation.clone(),
        );
        registry.register(
            STREAM_OPERATION_TIME,
            "Time taken by a stream operation in milliseconds",
            metrics.stream_operation_time.clone(),
        );
        registry.register(
            APPEND_BYTES,
            "Total number of serialized row bytes submitted to the write stream",
            metrics.append_bytes.clone(),
        );
        registry.register(
            APPEND_ROWS,
            "Total number of rows submitted to the write stream",
            metrics.append_rows.clone(),
        );
        registry.register(
            RECORD_ERRORS,
            "Total number of records reported as failed, by error type",
            metrics.record_errors.clone(),
        );
        metrics
    }
}

static SINK_METRICS: OnceLock<SinkMetrics> = OnceLock::new();

pub(crate) fn sink_metrics() -> &'static SinkMetrics {
    SINK_METRICS.get_or_init(SinkMetrics::new)
}

pub(crate) fn table_labels(table: &TableName, operation: Operation) -> Vec<(String, String)> {
    vec![
        (PROJECT_LABEL.to_string(), table.project.clone()),
        (DATASET_LABEL.to_string(), table.dataset.clone()),
        (TABLE_LABEL.to_string(), table.table.clone()),
        (OPERATION_LABEL.to_string(), operation.as_str().to_string()),
    ]
}

/// Counts one `operation` against `table` and records how long it took.
pub(crate) fn record_operation(table: &TableName, operation: Operation, elapsed: Duration) {
    let labels = table_labels(table, operation);
    let metrics = sink_metrics();
    metrics.stream_operation.get_or_create(&labels).inc();
    metrics
        .stream_operation_time
        .get_or_create(&labels)
        .observe(elapsed.as_secs_f64() * 1000.0);
}

pub(crate) fn record_append(table: &TableName, rows: usize, bytes: usize) {
    let labels = table_labels(table, Operation::Append);
    let metrics = sink_metrics();
    metrics.append_rows.get_or_create(&labels).inc_by(rows as u64);
    metrics.append_bytes.get_or_create(&labels).inc_by(bytes as u64);
}

pub(crate) fn record_errors(table: &TableName, kind: ErrorKind, count: u64) {
    let mut labels = table_labels(table, Operation::Append);
    labels.push((ERROR_TYPE_LABEL.to_string(), kind.as_str().to_string()));
    sink_metrics()
        .record_errors
        .get_or_create(&labels)
        .inc_by(count);
}

/// Renders all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, std::fmt::Error> {
    // make sure the families exist even before the first observation
    sink_metrics();
    let mut buffer = String::new();
    let registry = global_registry().registry.lock();
    encode(&mut buffer, &registry)?;
    Ok(buffer)
}
