//! Rendering of records into JSON payloads

use crate::errors::{HookError, Result};
use crate::record::Record;
use chrono::{DateTime, FixedOffset, Timelike};
use serde_json::{Map, Value};
use std::collections::HashMap;

const MESSAGE_KEY: &str = "msg";
const TIME_KEY: &str = "time";
const LEVEL_KEY: &str = "level";

/// Turns one record into a serialized object
pub trait Formatter: Send + Sync {
    fn format(&self, record: &Record) -> Result<Vec<u8>>;
}

/// JSON formatter with static fields and field renaming
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    additional_fields: HashMap<String, String>,
    field_rename_map: HashMap<String, String>,
}

impl JsonFormatter {
    pub fn new(
        additional_fields: HashMap<String, String>,
        field_rename_map: HashMap<String, String>,
    ) -> Self {
        Self {
            additional_fields,
            field_rename_map,
        }
    }

    fn field_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.field_rename_map
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, record: &Record) -> Result<Vec<u8>> {
        let mut object = Map::new();

        for (key, value) in &self.additional_fields {
            object.insert(self.field_name(key).to_string(), Value::String(value.clone()));
        }

        for (key, value) in &record.fields {
            object.insert(self.field_name(key).to_string(), value.clone());
        }

        object.insert(
            self.field_name(MESSAGE_KEY).to_string(),
            Value::String(record.message.clone()),
        );
        object.insert(
            self.field_name(TIME_KEY).to_string(),
            Value::String(format_time(&record.time)),
        );
        object.insert(
            self.field_name(LEVEL_KEY).to_string(),
            Value::String(record.level.to_string()),
        );

        serde_json::to_vec(&object).map_err(|e| HookError::Format(e.to_string()))
    }
}

/// ISO-8601 with millisecond precision, trailing zeros trimmed and `Z` for UTC
pub fn format_time(time: &DateTime<FixedOffset>) -> String {
    let mut out = time.format("%Y-%m-%dT%H:%M:%S").to_string();

    let millis = time.nanosecond() % 1_000_000_000 / 1_000_000;
    if millis > 0 {
        let fraction = format!("{:03}", millis);
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }

    if time.offset().local_minus_utc() == 0 {
        out.push('Z');
    } else {
        out.push_str(&time.format("%:z").to_string());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use chrono::TimeZone;

    fn decode(bytes: &[u8]) -> Map<String, Value> {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_formatter_additional_fields() {
        let formatter = JsonFormatter::new(
            HashMap::from([("hello".to_string(), "world".to_string())]),
            HashMap::new(),
        );

        let payload = decode(&formatter.format(&Record::new(Level::Info, "m")).unwrap());
        assert_eq!(payload["hello"], "world");
    }

    #[test]
    fn test_record_fields_override_additional_fields() {
        let formatter = JsonFormatter::new(
            HashMap::from([
                ("env".to_string(), "prod".to_string()),
                ("app".to_string(), "api".to_string()),
            ]),
            HashMap::new(),
        );

        let record = Record::new(Level::Info, "m").with_field("env", "staging");
        let payload = decode(&formatter.format(&record).unwrap());
        assert_eq!(payload["env"], "staging");
        assert_eq!(payload["app"], "api");
    }

    #[test]
    fn test_formatter_field_name_map() {
        let formatter = JsonFormatter::new(
            HashMap::new(),
            HashMap::from([("hello".to_string(), "buongiorno".to_string())]),
        );

        let record = Record::new(Level::Info, "m").with_field("hello", "world");
        let payload = decode(&formatter.format(&record).unwrap());
        assert_eq!(payload["buongiorno"], "world");
        assert!(!payload.contains_key("hello"));
    }

    #[test]
    fn test_reserved_fields_are_renamed() {
        let formatter = JsonFormatter::new(
            HashMap::new(),
            HashMap::from([
                ("msg".to_string(), "message".to_string()),
                ("time".to_string(), "@timestamp".to_string()),
                ("level".to_string(), "severity".to_string()),
            ]),
        );

        let payload = decode(&formatter.format(&Record::new(Level::Warn, "careful")).unwrap());
        assert_eq!(payload["message"], "careful");
        assert_eq!(payload["severity"], "warning");
        assert!(payload.contains_key("@timestamp"));
        for original in ["msg", "time", "level"] {
            assert!(!payload.contains_key(original));
        }
    }

    #[test]
    fn test_reserved_fields_win_over_record_fields() {
        let formatter = JsonFormatter::default();
        let record = Record::new(Level::Error, "real").with_field("msg", "shadow");

        let payload = decode(&formatter.format(&record).unwrap());
        assert_eq!(payload["msg"], "real");
        assert_eq!(payload["level"], "error");
    }

    #[test]
    fn test_format_time() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let t = utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(format_time(&t), "2006-01-02T15:04:05Z");

        let t = t + chrono::Duration::milliseconds(120);
        assert_eq!(format_time(&t), "2006-01-02T15:04:05.12Z");

        let plus_seven = FixedOffset::west_opt(7 * 3600).unwrap();
        let t = plus_seven
            .with_ymd_and_hms(2006, 1, 2, 15, 4, 5)
            .unwrap()
            + chrono::Duration::microseconds(999_900);
        assert_eq!(format_time(&t), "2006-01-02T15:04:05.999-07:00");
    }
}
