//! The converted form of an input batch, together with the bookkeeping required to map a
//! position in the serialized rows back to the position of the record in the input batch.

use std::collections::BTreeMap;

use bqsink_pb::storage::ProtoRows;
use bytes::Bytes;

use crate::error::ErrorInfo;

/// Outcome of converting one input record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub input_index: i64,
    pub error: Option<ErrorInfo>,
    pub valid: bool,
}

/// Serialized rows ready for an append, with one [RecordOutcome] per input record.
///
/// Rows are appended in input order and invalid records are skipped, so the row position and
/// the input position diverge after the first invalid record. `valid_index_to_input_index` is the
/// only source of truth for going from one to the other.
#[derive(Debug, Clone, Default)]
pub struct IndexedPayload {
    rows: ProtoRows,
    outcomes: Vec<RecordOutcome>,
    valid_index_to_input_index: BTreeMap<i64, i64>,
}

impl IndexedPayload {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: ProtoRows {
                serialized_rows: Vec::with_capacity(capacity),
            },
            outcomes: Vec::with_capacity(capacity),
            valid_index_to_input_index: BTreeMap::new(),
        }
    }

    /// Records a converted row for the input at `input_index`.
    pub(crate) fn push_valid(&mut self, input_index: i64, row: Bytes) {
        let valid_index = self.rows.serialized_rows.len() as i64;
        self.rows.serialized_rows.push(row);
        self.valid_index_to_input_index
            .insert(valid_index, input_index);
        self.outcomes.push(RecordOutcome {
            input_index,
            error: None,
            valid: true,
        });
    }

    /// Records a conversion failure for the input at `input_index`. No row is emitted.
    pub(crate) fn push_invalid(&mut self, input_index: i64, error: ErrorInfo) {
        self.outcomes.push(RecordOutcome {
            input_index,
            error: Some(error),
            valid: false,
        });
    }

    /// The serialized rows, in input order.
    pub fn rows(&self) -> &ProtoRows {
        &self.rows
    }

    pub fn outcomes(&self) -> &[RecordOutcome] {
        &self.outcomes
    }

    pub fn valid_index_to_input_index(&self) -> &BTreeMap<i64, i64> {
        &self.valid_index_to_input_index
    }

    /// Input position of the row at `valid_index`.
    pub fn input_index(&self, valid_index: i64) -> Option<i64> {
        self.valid_index_to_input_index.get(&valid_index).copied()
    }

    /// Number of rows that made it into the payload.
    pub fn valid_count(&self) -> usize {
        self.rows.serialized_rows.len()
    }

    /// Returns true if no row is available to append.
    pub fn is_empty(&self) -> bool {
        self.rows.serialized_rows.is_empty()
    }

    /// Total size of the serialized rows.
    pub fn byte_size(&self) -> usize {
        self.rows.serialized_rows.iter().map(Bytes::len).sum()
    }

    /// Outcomes of records that failed conversion.
    pub fn invalid_outcomes(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.valid)
    }

    /// Errors of the records that failed conversion, keyed by input position.
    pub fn conversion_errors(&self) -> BTreeMap<i64, ErrorInfo> {
        self.invalid_outcomes()
            .filter_map(|outcome| {
                outcome
                    .error
                    .clone()
                    .map(|error| (outcome.input_index, error))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_index_mapping_skips_invalid_records() {
        let mut payload = IndexedPayload::with_capacity(5);
        payload.push_valid(0, Bytes::from_static(b"a"));
        payload.push_invalid(1, ErrorInfo::new("empty", ErrorKind::InvalidMessage));
        payload.push_invalid(2, ErrorInfo::new("bad", ErrorKind::Deserialization));
        payload.push_valid(3, Bytes::from_static(b"bb"));
        payload.push_valid(4, Bytes::from_static(b"ccc"));

        assert_eq!(payload.outcomes().len(), 5);
        assert_eq!(payload.valid_count(), 3);
        assert_eq!(payload.byte_size(), 6);
        assert_eq!(
            payload.valid_index_to_input_index(),
            &BTreeMap::from([(0, 0), (1, 3), (2, 4)])
        );
        assert_eq!(payload.input_index(1), Some(3));
        assert_eq!(payload.input_index(3), None);

        let invalid: Vec<i64> = payload
            .invalid_outcomes()
            .map(|outcome| outcome.input_index)
            .collect();
        assert_eq!(invalid, vec![1, 2]);
        assert_eq!(
            payload.conversion_errors().keys().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_valid_mapping_is_dense_and_monotonic() {
        let mut payload = IndexedPayload::default();
        for input_index in 0..20 {
            if input_index % 3 == 0 {
                payload.push_invalid(input_index, ErrorInfo::new("x", ErrorKind::SinkUnknown));
            } else {
                payload.push_valid(input_index, Bytes::from_static(b"row"));
            }
        }

        let valid = payload.outcomes().iter().filter(|o| o.valid).count();
        assert_eq!(payload.valid_index_to_input_index().len(), valid);

        let keys: Vec<i64> = payload.valid_index_to_input_index().keys().copied().collect();
        assert_eq!(keys, (0..valid as i64).collect::<Vec<_>>());

        let values: Vec<i64> = payload
            .valid_index_to_input_index()
            .values()
            .copied()
            .collect();
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_empty_payload() {
        let payload = IndexedPayload::with_capacity(0);
        assert!(payload.is_empty());
        assert_eq!(payload.byte_size(), 0);
        assert!(payload.outcomes().is_empty());
    }
}
