//! Entry point producers use to submit records and force flushes

use crate::collector::{self, CollectorEvent, Dispatcher, FlushTrigger};
use crate::config::{AsyncOptions, HookConfig};
use crate::errors::{HookError, Result};
use crate::formatter::{Formatter, JsonFormatter};
use crate::record::Record;
use crate::transport::{DeliveryMetricsSnapshot, HttpTransport, Transport};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Log hook delivering records to a Kafka REST proxy topic.
///
/// Cloning is cheap and every clone shares the same collector. The
/// collector lives as long as any clone does; once the last clone is
/// dropped it delivers whatever is still queued and exits. Call
/// [`Hook::flush`] before shutting the runtime down to be sure pending
/// records were sent.
#[derive(Clone)]
pub struct Hook {
    inner: Arc<HookInner>,
}

struct HookInner {
    hook_id: String,
    topic: String,
    mode: Mode,
    dispatcher: Arc<Dispatcher>,
}

enum Mode {
    Sync,
    Async {
        events: mpsc::UnboundedSender<CollectorEvent>,
        options: AsyncOptions,
    },
}

impl Hook {
    /// Create a hook with the JSON formatter and HTTP transport
    pub fn new(config: HookConfig) -> Result<Self> {
        let formatter = JsonFormatter::new(
            config.fields.additional_fields.clone(),
            config.fields.field_rename_map.clone(),
        );
        let transport = HttpTransport::new(&config)?;

        Self::with_components(config, Arc::new(formatter), Arc::new(transport))
    }

    /// Create a hook with a custom formatter and transport
    pub fn with_components(
        config: HookConfig,
        formatter: Arc<dyn Formatter>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate().map_err(HookError::Config)?;

        let hook_id = Uuid::new_v4().to_string();
        let dispatcher = Arc::new(Dispatcher::new(
            formatter,
            transport,
            config.client.report_send_errors,
        ));

        let mode = match config.async_options {
            None => Mode::Sync,
            Some(options) => {
                let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                    HookError::Config("async batching requires a Tokio runtime".to_string())
                })?;
                let options = options.with_defaults();

                Mode::Async {
                    events: collector::spawn(&handle, options, Arc::clone(&dispatcher)),
                    options,
                }
            }
        };

        info!(
            "Created hook {} for topic {} at {} ({})",
            hook_id,
            config.topic,
            config.proxy_url,
            if matches!(mode, Mode::Sync) { "sync" } else { "async" }
        );

        Ok(Self {
            inner: Arc::new(HookInner {
                hook_id,
                topic: config.topic,
                mode,
                dispatcher,
            }),
        })
    }

    /// Submit one record.
    ///
    /// Without async batching the record is delivered right away and any
    /// delivery error is returned. With async batching the record is handed
    /// to the collector and this returns without waiting for the network.
    pub async fn submit(&self, record: Record) -> Result<()> {
        match &self.inner.mode {
            Mode::Sync => {
                self.inner
                    .dispatcher
                    .deliver(vec![record], FlushTrigger::Submit)
                    .await
            }
            Mode::Async { events, .. } => events
                .send(CollectorEvent::Enqueue(record))
                .map_err(|_| HookError::CollectorClosed),
        }
    }

    /// Hand a record off without waiting; used where producers cannot await.
    ///
    /// Synchronous mode spawns the delivery on the current runtime, or drops
    /// the record when there is none.
    pub(crate) fn submit_detached(&self, record: Record) {
        match &self.inner.mode {
            Mode::Async { events, .. } => {
                if events.send(CollectorEvent::Enqueue(record)).is_err() {
                    debug!("Collector is closed, dropping record");
                }
            }
            Mode::Sync => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let dispatcher = Arc::clone(&self.inner.dispatcher);
                    handle.spawn(async move {
                        if let Err(e) = dispatcher.deliver(vec![record], FlushTrigger::Submit).await {
                            error!("Failed to deliver record: {}", e);
                        }
                    });
                }
            }
        }
    }

    /// Deliver everything queued so far and wait for the attempt to finish.
    ///
    /// A no-op without async batching.
    #[instrument(skip(self), fields(hook_id = %self.inner.hook_id))]
    pub async fn flush(&self) -> Result<()> {
        let Mode::Async { events, .. } = &self.inner.mode else {
            return Ok(());
        };

        let (done, completed) = oneshot::channel();
        events
            .send(CollectorEvent::FlushRequested(done))
            .map_err(|_| HookError::CollectorClosed)?;

        completed.await.map_err(|_| HookError::CollectorClosed)?
    }

    /// Delivery metrics for this hook
    pub async fn stats(&self) -> DeliveryMetricsSnapshot {
        self.inner.dispatcher.metrics().snapshot().await
    }

    pub fn hook_id(&self) -> &str {
        &self.inner.hook_id
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Effective batching thresholds, `None` in synchronous mode
    pub fn async_options(&self) -> Option<AsyncOptions> {
        match &self.inner.mode {
            Mode::Sync => None,
            Mode::Async { options, .. } => Some(*options),
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("hook_id", &self.inner.hook_id)
            .field("topic", &self.inner.topic)
            .field("async_options", &self.async_options())
            .finish()
    }
}
