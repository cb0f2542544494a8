//! Assembly of formatted records into the Kafka REST batch envelope

use crate::errors::Result;
use crate::formatter::Formatter;
use crate::record::Record;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, warn};

/// Wire envelope: `{"records": [{"value": ...}, ...]}`
#[derive(Debug, Serialize)]
pub struct KafkaBatch {
    pub records: Vec<KafkaRecord>,
}

#[derive(Debug, Serialize)]
pub struct KafkaRecord {
    pub value: Box<RawValue>,
}

impl KafkaBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Format records in order, dropping any that fail to format
pub fn format_records(formatter: &dyn Formatter, records: &[Record]) -> Vec<Vec<u8>> {
    records
        .iter()
        .filter_map(|record| match formatter.format(record) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Dropping record that failed to format: {}", e);
                None
            }
        })
        .collect()
}

/// Wrap formatted payloads into a batch, preserving order.
///
/// A payload that is not a valid JSON document is dropped rather than
/// failing the batch.
pub fn assemble(payloads: Vec<Vec<u8>>) -> KafkaBatch {
    let total = payloads.len();

    let records: Vec<KafkaRecord> = payloads
        .into_iter()
        .filter_map(|payload| {
            let text = match String::from_utf8(payload) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping payload that is not UTF-8: {}", e);
                    return None;
                }
            };

            match RawValue::from_string(text) {
                Ok(value) => Some(KafkaRecord { value }),
                Err(e) => {
                    warn!("Dropping payload that is not valid JSON: {}", e);
                    None
                }
            }
        })
        .collect();

    debug!("Assembled batch of {} records ({} payloads)", records.len(), total);

    KafkaBatch { records }
}
