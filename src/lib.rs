//! Kafka REST Proxy Log Hook
//!
//! Delivers structured log records to a Kafka REST proxy topic, either one
//! request per record or batched by an asynchronous collector that flushes
//! on queue age, record count, or an explicit [`Hook::flush`].

pub mod batch;
mod collector;
pub mod config;
pub mod errors;
pub mod formatter;
pub mod hook;
pub mod layer;
pub mod record;
pub mod transport;

pub use config::{AsyncOptions, ClientOptions, FieldOptions, HookConfig, TlsOptions};
pub use errors::{HookError, Result};
pub use formatter::{Formatter, JsonFormatter};
pub use hook::Hook;
pub use layer::KafkaRestLayer;
pub use record::{Level, Record};
pub use transport::{DeliveryMetricsSnapshot, HttpTransport, Transport};
