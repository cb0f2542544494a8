//! Asynchronous batching collector
//!
//! A single task owns the pending queue and the queue timer. Producers
//! only ever talk to it through [`CollectorEvent`]s, so every enqueue,
//! timer expiry and flush request is handled one at a time and the queue
//! needs no lock.

use crate::batch::{assemble, format_records};
use crate::config::AsyncOptions;
use crate::errors::Result;
use crate::formatter::Formatter;
use crate::record::Record;
use crate::transport::{DeliveryMetrics, Transport};

use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub(crate) enum CollectorEvent {
    Enqueue(Record),
    TimerFired,
    FlushRequested(oneshot::Sender<Result<()>>),
}

/// What caused a batch to be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTrigger {
    Submit,
    Unbatched,
    RecordLength,
    QueueTimeout,
    Flush,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushTrigger::Submit => write!(f, "submit"),
            FlushTrigger::Unbatched => write!(f, "unbatched"),
            FlushTrigger::RecordLength => write!(f, "record_length"),
            FlushTrigger::QueueTimeout => write!(f, "queue_timeout"),
            FlushTrigger::Flush => write!(f, "flush"),
            FlushTrigger::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Formats, assembles and delivers batches; shared by every delivery of a hook
pub(crate) struct Dispatcher {
    formatter: Arc<dyn Formatter>,
    transport: Arc<dyn Transport>,
    metrics: DeliveryMetrics,
    report_send_errors: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        formatter: Arc<dyn Formatter>,
        transport: Arc<dyn Transport>,
        report_send_errors: bool,
    ) -> Self {
        Self {
            formatter,
            transport,
            metrics: DeliveryMetrics::new(),
            report_send_errors,
        }
    }

    pub(crate) fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }

    /// Deliver `records` as one batch.
    ///
    /// Non-success responses are returned. Send failures are only returned
    /// when `report_send_errors` is set, otherwise they are logged and dropped.
    pub(crate) async fn deliver(&self, records: Vec<Record>, trigger: FlushTrigger) -> Result<()> {
        let batch_id = Uuid::new_v4();
        let submitted = records.len();

        let batch = assemble(format_records(self.formatter.as_ref(), &records));
        self.metrics.record_dropped(submitted - batch.len()).await;

        if batch.is_empty() {
            warn!(%batch_id, %trigger, "No deliverable records in batch of {}", submitted);
            return Ok(());
        }

        let delivered = batch.len();
        let body = batch.to_bytes()?;

        debug!(%batch_id, %trigger, "Delivering batch of {} records", delivered);

        let start_time = std::time::Instant::now();
        match self.transport.deliver(body).await {
            Ok(()) => {
                self.metrics.record_success(delivered, start_time.elapsed()).await;
                debug!(%batch_id, "Delivered batch of {} records", delivered);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failure(start_time.elapsed()).await;

                if e.is_send_failure() && !self.report_send_errors {
                    warn!(%batch_id, "Dropping batch of {} records after send failure: {}", delivered, e);
                    return Ok(());
                }

                Err(e)
            }
        }
    }
}

/// Single owner of the pending queue
pub(crate) struct Collector {
    events: mpsc::UnboundedReceiver<CollectorEvent>,
    queue: Vec<Record>,
    options: AsyncOptions,
    dispatcher: Arc<Dispatcher>,
    deadline: Option<Instant>,
}

impl Collector {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<CollectorEvent>,
        options: AsyncOptions,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            events,
            queue: Vec::new(),
            options,
            dispatcher,
            deadline: None,
        }
    }

    /// Process events until every sender is gone, then deliver what is left
    #[instrument(skip(self), fields(queue_timeout = ?self.options.queue_timeout, record_length = self.options.record_length))]
    pub(crate) async fn run(mut self) {
        info!("Collector started");

        loop {
            let event = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = wait_for(self.deadline) => CollectorEvent::TimerFired,
            };

            self.handle(event).await;
        }

        if !self.queue.is_empty() {
            let records = std::mem::take(&mut self.queue);
            if let Err(e) = self.dispatcher.deliver(records, FlushTrigger::Shutdown).await {
                error!("Failed to deliver final batch: {}", e);
            }
        }

        info!("Collector stopped");
    }

    pub(crate) async fn handle(&mut self, event: CollectorEvent) {
        match event {
            CollectorEvent::Enqueue(record) => {
                self.queue.push(record);

                let queue_timeout = self.options.queue_timeout;

                if let Some(trigger) = self.enqueue_trigger() {
                    self.dispatch(trigger);
                    self.deadline = None;
                } else if self.deadline.is_none() && !queue_timeout.is_zero() {
                    self.deadline = Some(Instant::now() + queue_timeout);
                }
            }

            CollectorEvent::TimerFired => {
                if !self.queue.is_empty() {
                    self.dispatch(FlushTrigger::QueueTimeout);
                }
                self.deadline = None;
            }

            CollectorEvent::FlushRequested(done) => {
                self.deadline = None;

                let result = if self.queue.is_empty() {
                    Ok(())
                } else {
                    let records = std::mem::take(&mut self.queue);
                    self.dispatcher.deliver(records, FlushTrigger::Flush).await
                };

                if done.send(result).is_err() {
                    debug!("Flush requester went away before completion");
                }
            }
        }
    }

    /// Trigger for draining right after an enqueue, if any.
    ///
    /// With neither threshold set every record is dispatched on its own.
    fn enqueue_trigger(&self) -> Option<FlushTrigger> {
        let record_length = self.options.record_length;

        if record_length > 0 && self.queue.len() >= record_length {
            Some(FlushTrigger::RecordLength)
        } else if record_length == 0 && self.options.queue_timeout.is_zero() {
            Some(FlushTrigger::Unbatched)
        } else {
            None
        }
    }

    /// Drain the queue into a background delivery
    fn dispatch(&mut self, trigger: FlushTrigger) {
        let records = std::mem::take(&mut self.queue);
        let dispatcher = Arc::clone(&self.dispatcher);

        tokio::spawn(async move {
            let count = records.len();
            if let Err(e) = dispatcher.deliver(records, trigger).await {
                error!(%trigger, "Failed to deliver batch of {} records: {}", count, e);
            }
        });
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.queue.len()
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Start a collector on `handle` and return its event sender
pub(crate) fn spawn(
    handle: &tokio::runtime::Handle,
    options: AsyncOptions,
    dispatcher: Arc<Dispatcher>,
) -> mpsc::UnboundedSender<CollectorEvent> {
    let (sender, receiver) = mpsc::unbounded_channel();
    handle.spawn(Collector::new(receiver, options, dispatcher).run());
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HookError;
    use crate::formatter::JsonFormatter;
    use crate::record::Level;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<Vec<String>>>,
        fail_with: Option<u16>,
    }

    impl RecordingTransport {
        fn messages(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, body: Vec<u8>) -> Result<()> {
            let parsed: Value = serde_json::from_slice(&body)?;
            let messages = parsed["records"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["value"]["msg"].as_str().unwrap().to_string())
                .collect();
            self.batches.lock().unwrap().push(messages);

            match self.fail_with {
                Some(status) => Err(HookError::Delivery {
                    topic: "test".to_string(),
                    status,
                }),
                None => Ok(()),
            }
        }
    }

    fn collector(
        options: AsyncOptions,
        transport: Arc<RecordingTransport>,
    ) -> (Collector, mpsc::UnboundedSender<CollectorEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(JsonFormatter::default()),
            transport,
            false,
        ));
        (Collector::new(receiver, options, dispatcher), sender)
    }

    fn enqueue(message: &str) -> CollectorEvent {
        CollectorEvent::Enqueue(Record::new(Level::Info, message))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_record_length_dispatches_and_clears_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut collector, _sender) =
            collector(AsyncOptions::new(Duration::from_secs(10), 2), transport.clone());

        collector.handle(enqueue("message 1")).await;
        assert_eq!(collector.pending(), 1);
        assert!(collector.deadline.is_some());

        collector.handle(enqueue("message 2")).await;
        assert_eq!(collector.pending(), 0);
        assert!(collector.deadline.is_none());

        settle().await;
        assert_eq!(transport.messages(), vec![vec!["message 1", "message 2"]]);
    }

    #[tokio::test]
    async fn test_timer_starts_at_first_record_only() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut collector, _sender) =
            collector(AsyncOptions::new(Duration::from_secs(10), 0), transport);

        collector.handle(enqueue("a")).await;
        let first_deadline = collector.deadline;

        tokio::time::sleep(Duration::from_millis(5)).await;
        collector.handle(enqueue("b")).await;

        assert_eq!(collector.deadline, first_deadline);
        assert_eq!(collector.pending(), 2);
    }

    #[tokio::test]
    async fn test_timer_fired_on_empty_queue_is_noop() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut collector, _sender) =
            collector(AsyncOptions::new(Duration::from_secs(1), 0), transport.clone());

        collector.handle(CollectorEvent::TimerFired).await;
        settle().await;

        assert!(transport.messages().is_empty());
        assert!(collector.deadline.is_none());
    }

    #[tokio::test]
    async fn test_no_thresholds_dispatches_every_record() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut collector, _sender) = collector(AsyncOptions::default(), transport.clone());

        collector.handle(enqueue("a")).await;
        collector.handle(enqueue("b")).await;
        settle().await;

        assert_eq!(collector.pending(), 0);
        assert_eq!(transport.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_trigger_names_the_cause() {
        let transport = Arc::new(RecordingTransport::default());

        let (mut unbatched, _sender) = collector(AsyncOptions::default(), transport.clone());
        unbatched.queue.push(Record::new(Level::Info, "a"));
        assert_eq!(unbatched.enqueue_trigger(), Some(FlushTrigger::Unbatched));

        let (mut counted, _sender) =
            collector(AsyncOptions::new(Duration::from_secs(10), 2), transport.clone());
        counted.queue.push(Record::new(Level::Info, "a"));
        assert_eq!(counted.enqueue_trigger(), None);
        counted.queue.push(Record::new(Level::Info, "b"));
        assert_eq!(counted.enqueue_trigger(), Some(FlushTrigger::RecordLength));

        let (mut timed, _sender) = collector(AsyncOptions::new(Duration::from_secs(10), 0), transport);
        timed.queue.push(Record::new(Level::Info, "a"));
        assert_eq!(timed.enqueue_trigger(), None);
    }

    #[tokio::test]
    async fn test_flush_delivers_synchronously_and_reports_error() {
        let transport = Arc::new(RecordingTransport {
            fail_with: Some(500),
            ..Default::default()
        });
        let (mut collector, _sender) =
            collector(AsyncOptions::new(Duration::from_secs(10), 100), transport.clone());

        collector.handle(enqueue("a")).await;
        collector.handle(enqueue("b")).await;

        let (done, result) = oneshot::channel();
        collector.handle(CollectorEvent::FlushRequested(done)).await;

        assert_eq!(transport.messages(), vec![vec!["a", "b"]]);
        assert!(matches!(
            result.await.unwrap(),
            Err(HookError::Delivery { status: 500, .. })
        ));
        assert_eq!(collector.pending(), 0);
        assert!(collector.deadline.is_none());
    }

    #[tokio::test]
    async fn test_flush_on_empty_queue_signals_immediately() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut collector, _sender) = collector(AsyncOptions::default().with_defaults(), transport.clone());

        let (done, result) = oneshot::channel();
        collector.handle(CollectorEvent::FlushRequested(done)).await;

        assert!(result.await.unwrap().is_ok());
        assert!(transport.messages().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_queue_when_senders_drop() {
        let transport = Arc::new(RecordingTransport::default());
        let (collector, sender) =
            collector(AsyncOptions::new(Duration::from_secs(60), 100), transport.clone());
        let task = tokio::spawn(collector.run());

        sender.send(enqueue("left behind")).unwrap();
        drop(sender);
        task.await.unwrap();

        assert_eq!(transport.messages(), vec![vec!["left behind"]]);
    }

    #[tokio::test]
    async fn test_run_survives_delivery_failures() {
        let transport = Arc::new(RecordingTransport {
            fail_with: Some(503),
            ..Default::default()
        });
        let (collector, sender) =
            collector(AsyncOptions::new(Duration::from_millis(10), 1), transport.clone());
        tokio::spawn(collector.run());

        sender.send(enqueue("first")).unwrap();
        sender.send(enqueue("second")).unwrap();

        let (done, result) = oneshot::channel();
        sender.send(CollectorEvent::FlushRequested(done)).unwrap();
        assert!(result.await.unwrap().is_ok());

        settle().await;
        assert_eq!(transport.messages().len(), 2);
    }
}
