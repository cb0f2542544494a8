//! HTTP transport layer for sending batches to the Kafka REST proxy

use crate::config::{ClientOptions, HookConfig};
use crate::errors::{HookError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Identity, Response};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

pub const KAFKA_JSON_CONTENT_TYPE: &str = "application/vnd.kafka.json.v1+json";

/// Delivers one serialized batch
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, body: Vec<u8>) -> Result<()>;
}

/// HTTP transport posting to `<proxy>/topics/<topic>`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    topic: String,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: &HookConfig) -> Result<Self> {
        let client = build_client(&config.client)?;

        Ok(Self {
            client,
            url: config.topic_url(),
            topic: config.topic.clone(),
            headers: build_headers(&config.client)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Handle the HTTP response from the proxy
    async fn handle_response(&self, response: Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            debug!("Batch accepted by proxy for topic {}", self.topic);
            return Ok(());
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        debug!(
            "Proxy rejected batch for topic {} with {}: {}",
            self.topic, status, error_body
        );

        Err(HookError::Delivery {
            topic: self.topic.clone(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, body: Vec<u8>) -> Result<()> {
        debug!("Posting {} bytes to {}", body.len(), self.url);

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await?;

        self.handle_response(response).await
    }
}

fn build_client(options: &ClientOptions) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(format!("kafka_rest_logger/{}", env!("CARGO_PKG_VERSION")));

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(tls) = &options.tls {
        if let Some(ca_bundle) = &tls.ca_bundle_pem {
            let certificates = Certificate::from_pem_bundle(ca_bundle)
                .map_err(|e| HookError::Tls(format!("invalid CA bundle: {}", e)))?;
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        if let (Some(cert), Some(key)) = (&tls.client_cert_pem, &tls.client_key_pem) {
            let mut pem = cert.clone();
            pem.push(b'\n');
            pem.extend_from_slice(key);

            let identity = Identity::from_pem(&pem)
                .map_err(|e| HookError::Tls(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
    }

    builder
        .build()
        .map_err(|e| HookError::Config(format!("unable to build HTTP client: {}", e)))
}

/// Content type first, so configured headers may override it
fn build_headers(options: &ClientOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(KAFKA_JSON_CONTENT_TYPE));

    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HookError::Config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HookError::Config(format!("invalid value for header '{}': {}", name, e)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Delivery metrics shared by every concurrent delivery of a hook
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    counters: RwLock<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    attempts: u64,
    successes: u64,
    failures: u64,
    records_delivered: u64,
    records_dropped: u64,
    total_duration: Duration,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn record_success(&self, records: usize, duration: Duration) {
        let mut counters = self.counters.write().await;
        counters.attempts += 1;
        counters.successes += 1;
        counters.records_delivered += records as u64;
        counters.total_duration += duration;
    }

    pub(crate) async fn record_failure(&self, duration: Duration) {
        let mut counters = self.counters.write().await;
        counters.attempts += 1;
        counters.failures += 1;
        counters.total_duration += duration;
    }

    pub(crate) async fn record_dropped(&self, records: usize) {
        if records > 0 {
            self.counters.write().await.records_dropped += records as u64;
        }
    }

    pub async fn snapshot(&self) -> DeliveryMetricsSnapshot {
        let counters = self.counters.read().await;

        let success_rate = if counters.attempts > 0 {
            (counters.successes as f64 / counters.attempts as f64) * 100.0
        } else {
            0.0
        };

        let avg_duration = if counters.attempts > 0 {
            counters.total_duration / counters.attempts as u32
        } else {
            Duration::ZERO
        };

        DeliveryMetricsSnapshot {
            attempts: counters.attempts,
            successes: counters.successes,
            failures: counters.failures,
            records_delivered: counters.records_delivered,
            records_dropped: counters.records_dropped,
            success_rate,
            avg_duration_ms: avg_duration.as_millis() as u64,
        }
    }
}

/// Snapshot of delivery metrics
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub records_delivered: u64,
    pub records_dropped: u64,
    pub success_rate: f64,
    pub avg_duration_ms: u64,
}
