//! Maps the outcome of an append back to the records of the input batch.
//!
//! The service reports errors by row position within the submitted rows. Positions are resolved
//! to input positions through [IndexedPayload::valid_index_to_input_index] only. When several
//! rules apply to one record the most specific one wins, in this order:
//!
//! 1. conversion failures, the record never reached the stream
//! 2. per-row errors reported by the service or attached to a submission error
//! 3. the classification of the stream-level or submission error, applied to every row

use std::collections::{BTreeMap, HashSet};

use bqsink_pb::storage::AppendRowsResponse;
use bqsink_pb::storage::append_rows_response::Response;
use tonic::Code;
use tracing::{debug, warn};

use crate::error::{Error, ErrorInfo, ErrorKind};
use crate::message::InputMessage;
use crate::payload::IndexedPayload;

/// Stream-level codes caused by the request rather than by the service.
const CLIENT_FAULT_CODES: [Code; 10] = [
    Code::Cancelled,
    Code::InvalidArgument,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::Unauthenticated,
    Code::ResourceExhausted,
    Code::FailedPrecondition,
    Code::Aborted,
    Code::OutOfRange,
];

/// Codes of failed submissions that are worth retrying.
const RETRYABLE_SUBMISSION_CODES: [Code; 6] = [
    Code::Internal,
    Code::Aborted,
    Code::Cancelled,
    Code::FailedPrecondition,
    Code::DeadlineExceeded,
    Code::Unavailable,
];

/// The outcome of an append, as seen by the translator.
pub type AppendOutcome<'a> = std::result::Result<&'a AppendRowsResponse, &'a Error>;

#[derive(Debug, Clone, Default)]
pub struct ResponseTranslator {
    retryable_codes: HashSet<Code>,
}

impl ResponseTranslator {
    /// `retryable_codes` are reported as [ErrorKind::SinkRetryable] whenever a whole batch fails
    /// with one of them.
    pub fn new(retryable_codes: HashSet<Code>) -> Self {
        Self { retryable_codes }
    }

    /// Returns the error of every failed record, keyed by input position. Records without an
    /// entry were written.
    pub fn translate(
        &self,
        payload: &IndexedPayload,
        messages: &[InputMessage],
        outcome: AppendOutcome<'_>,
    ) -> BTreeMap<i64, ErrorInfo> {
        let mut errors = payload.conversion_errors();

        if !payload.is_empty() {
            match outcome {
                Ok(response) => self.translate_response(payload, response, &mut errors),
                Err(error) => self.translate_error(payload, error, &mut errors),
            }
        }

        debug!(
            records = messages.len(),
            rows = payload.valid_count(),
            failed = errors.len(),
            "Translated append outcome"
        );
        errors
    }

    fn translate_response(
        &self,
        payload: &IndexedPayload,
        response: &AppendRowsResponse,
        errors: &mut BTreeMap<i64, ErrorInfo>,
    ) {
        for row_error in &response.row_errors {
            insert_row_error(payload, row_error.index, &row_error.message, errors);
        }

        if let Some(Response::Error(status)) = &response.response {
            let code = Code::from_i32(status.code);
            let kind = self.classify_stream_error(code);
            debug!(?code, %kind, reason = %status.message, "Append failed for the whole batch");
            classify_all(payload, &status.message, kind, errors);
        }
    }

    fn translate_error(
        &self,
        payload: &IndexedPayload,
        error: &Error,
        errors: &mut BTreeMap<i64, ErrorInfo>,
    ) {
        if let Some(row_errors) = error.row_errors() {
            for (row, message) in row_errors {
                insert_row_error(payload, *row, message, errors);
            }
        }

        let code = error.status_code();
        let kind = self.classify_submission_error(code);
        debug!(?code, %kind, %error, "Append could not be completed");
        classify_all(payload, &error.to_string(), kind, errors);
    }

    fn classify_stream_error(&self, code: Code) -> ErrorKind {
        if self.retryable_codes.contains(&code) {
            ErrorKind::SinkRetryable
        } else if CLIENT_FAULT_CODES.contains(&code) {
            ErrorKind::Sink4xx
        } else {
            ErrorKind::Sink5xx
        }
    }

    fn classify_submission_error(&self, code: Code) -> ErrorKind {
        if self.retryable_codes.contains(&code) {
            ErrorKind::SinkRetryable
        } else if RETRYABLE_SUBMISSION_CODES.contains(&code) {
            ErrorKind::Sink5xx
        } else {
            ErrorKind::Sink4xx
        }
    }
}

fn insert_row_error(
    payload: &IndexedPayload,
    row: i64,
    message: &str,
    errors: &mut BTreeMap<i64, ErrorInfo>,
) {
    match payload.input_index(row) {
        Some(input_index) => {
            debug!(row, input_index, reason = message, "Row rejected");
            errors
                .entry(input_index)
                .or_insert_with(|| ErrorInfo::new(message, ErrorKind::Sink4xx));
        }
        None => warn!(row, reason = message, "Row error for a row that was not submitted"),
    }
}

/// Applies one classification to every submitted row that has no entry yet.
fn classify_all(
    payload: &IndexedPayload,
    cause: &str,
    kind: ErrorKind,
    errors: &mut BTreeMap<i64, ErrorInfo>,
) {
    for input_index in payload.valid_index_to_input_index().values() {
        errors
            .entry(*input_index)
            .or_insert_with(|| ErrorInfo::new(cause, kind));
    }
}
