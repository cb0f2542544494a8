//! Configuration for the Kafka REST log hook

use crate::errors::Result;
use reqwest::Url;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const DEFAULT_QUEUE_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RECORD_LENGTH: usize = 10;

#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Base URL of the Kafka REST proxy
    pub proxy_url: String,

    /// Topic the records are published to
    pub topic: String,

    /// Batching behaviour; `None` delivers every record synchronously
    pub async_options: Option<AsyncOptions>,

    /// HTTP client settings
    pub client: ClientOptions,

    /// Static fields and field renames applied by the formatter
    pub fields: FieldOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncOptions {
    /// Time to wait before flushing, counted from the first pending
    /// record. Zero means only `record_length` triggers a flush.
    pub queue_timeout: Duration,

    /// Number of records to hold before flushing. Zero means only
    /// `queue_timeout` triggers a flush.
    pub record_length: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Headers attached to every request
    pub headers: HashMap<String, String>,

    /// Overall request timeout
    pub timeout: Option<Duration>,

    /// Client certificate and CA material
    pub tls: Option<TlsOptions>,

    /// Surface network-level send failures from `submit` and `flush`.
    /// Non-success HTTP statuses are always surfaced.
    pub report_send_errors: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FieldOptions {
    /// Fields added to every record, overridden by record fields
    pub additional_fields: HashMap<String, String>,

    /// Original field name to emitted field name
    pub field_rename_map: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct TlsOptions {
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    pub ca_bundle_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("client_cert_pem", &self.client_cert_pem.is_some())
            .field("client_key_pem", &self.client_key_pem.is_some())
            .field("ca_bundle_pem", &self.ca_bundle_pem.is_some())
            .finish()
    }
}

impl TlsOptions {
    /// Load PEM material from disk
    pub fn from_files(
        client_cert: Option<&Path>,
        client_key: Option<&Path>,
        ca_bundle: Option<&Path>,
    ) -> Result<Self> {
        let read = |path: Option<&Path>| -> Result<Option<Vec<u8>>> {
            match path {
                Some(path) => Ok(Some(std::fs::read(path)?)),
                None => Ok(None),
            }
        };

        Ok(Self {
            client_cert_pem: read(client_cert)?,
            client_key_pem: read(client_key)?,
            ca_bundle_pem: read(ca_bundle)?,
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match (&self.client_cert_pem, &self.client_key_pem) {
            (Some(_), None) => Err("client certificate given without a private key".to_string()),
            (None, Some(_)) => Err("private key given without a client certificate".to_string()),
            _ => Ok(()),
        }
    }
}

impl AsyncOptions {
    pub fn new(queue_timeout: Duration, record_length: usize) -> Self {
        Self {
            queue_timeout,
            record_length,
        }
    }

    /// Replace an all-zero configuration with the default thresholds
    pub fn with_defaults(self) -> Self {
        if self.queue_timeout.is_zero() && self.record_length == 0 {
            Self {
                queue_timeout: Duration::from_secs(DEFAULT_QUEUE_TIMEOUT_SECONDS),
                record_length: DEFAULT_RECORD_LENGTH,
            }
        } else {
            self
        }
    }
}

impl HookConfig {
    pub fn new(proxy_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            topic: topic.into(),
            async_options: None,
            client: ClientOptions::default(),
            fields: FieldOptions::default(),
        }
    }

    pub fn with_async(mut self, options: AsyncOptions) -> Self {
        self.async_options = Some(options);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.client.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = Some(timeout);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.client.tls = Some(tls);
        self
    }

    pub fn with_additional_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.additional_fields.insert(key.into(), value.into());
        self
    }

    pub fn with_field_rename(mut self, original: impl Into<String>, renamed: impl Into<String>) -> Self {
        self.fields.field_rename_map.insert(original.into(), renamed.into());
        self
    }

    /// Endpoint records are POSTed to
    pub fn topic_url(&self) -> String {
        format!("{}/topics/{}", self.proxy_url.trim_end_matches('/'), self.topic)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.topic.is_empty() {
            return Err("A Kafka topic must be specified".to_string());
        }

        if self.proxy_url.is_empty() {
            return Err("proxy_url cannot be empty".to_string());
        }

        Url::parse(&self.proxy_url)
            .map_err(|e| format!("invalid proxy_url '{}': {}", self.proxy_url, e))?;

        if let Some(tls) = &self.client.tls {
            tls.validate()?;
        }

        Ok(())
    }
}
