//! Persistence boundary for finished records
//!
//! Two modes:
//! - Direct: the interceptor awaits the insert before returning the response
//! - Queued: records go onto a channel drained by a background worker that
//!   batches inserts (batch size or flush interval, whichever comes first)
//!
//! Neither mode ever surfaces an error to the caller; failures are reported
//! through `tracing` and the record is lost.

use crate::capture::record::NewLogRecord;
use crate::config::{ConfigError, LoggerConfig, OverflowPolicy, QueueConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Storage that accepts finished records
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Insert one record and return its id
    async fn write(&self, record: &NewLogRecord) -> anyhow::Result<i64>;

    /// Insert several records. Implementations may use a single transaction.
    async fn write_batch(&self, records: &[NewLogRecord]) -> anyhow::Result<()> {
        for record in records {
            self.write(record).await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub enum LogSink {
    Direct(Arc<dyn RecordWriter>),
    Queued(QueuedWriter),
}

impl LogSink {
    /// Build the sink selected by `use_queue`
    ///
    /// Queued mode spawns its worker, so this must run inside a tokio runtime.
    pub fn from_config(
        cfg: &LoggerConfig,
        writer: Arc<dyn RecordWriter>,
    ) -> Result<Self, ConfigError> {
        if cfg.use_queue {
            Ok(Self::Queued(QueuedWriter::spawn(&cfg.queue_name, &cfg.queue, writer)?))
        } else {
            Ok(Self::Direct(writer))
        }
    }

    pub async fn persist(&self, record: NewLogRecord) {
        match self {
            Self::Direct(writer) => {
                if let Err(e) = writer.write(&record).await {
                    tracing::error!(
                        error = %format!("{:#}", e),
                        correlation_id = %record.correlation_id,
                        method = %record.method,
                        url = %record.url,
                        "Failed to persist API log record"
                    );
                }
            }
            Self::Queued(queue) => queue.enqueue(record).await,
        }
    }

    /// Wait until every record handed to `persist` so far has been written
    pub async fn flush(&self) {
        if let Self::Queued(queue) = self {
            queue.flush().await;
        }
    }

    /// Records discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        match self {
            Self::Direct(_) => 0,
            Self::Queued(queue) => queue.dropped(),
        }
    }
}

#[derive(Debug)]
enum SinkMessage {
    Record(NewLogRecord),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
enum QueueSender {
    Bounded(mpsc::Sender<SinkMessage>),
    Unbounded(mpsc::UnboundedSender<SinkMessage>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<SinkMessage>),
    Unbounded(mpsc::UnboundedReceiver<SinkMessage>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<SinkMessage> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Handle to a named background persistence worker
#[derive(Clone)]
pub struct QueuedWriter {
    name: Arc<str>,
    sender: QueueSender,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl QueuedWriter {
    pub fn spawn(
        name: &str,
        cfg: &QueueConfig,
        writer: Arc<dyn RecordWriter>,
    ) -> Result<Self, ConfigError> {
        if cfg.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        let (sender, receiver) = if cfg.capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(cfg.capacity);
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        };

        let name: Arc<str> = Arc::from(name);
        let batch_size = cfg.batch_size;
        let flush_interval = Duration::from_millis(cfg.flush_interval_ms.max(1));

        tokio::spawn(worker(name.clone(), writer, receiver, batch_size, flush_interval));

        tracing::info!(
            queue = %name,
            capacity = cfg.capacity,
            batch_size = batch_size,
            "API log queue worker started"
        );

        Ok(Self {
            name,
            sender,
            overflow: cfg.overflow,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn enqueue(&self, record: NewLogRecord) {
        let result = match (&self.sender, self.overflow) {
            (QueueSender::Unbounded(tx), _) => tx.send(SinkMessage::Record(record)).map_err(|_| ()),
            (QueueSender::Bounded(tx), OverflowPolicy::Block) => {
                tx.send(SinkMessage::Record(record)).await.map_err(|_| ())
            }
            (QueueSender::Bounded(tx), OverflowPolicy::Drop) => {
                match tx.try_send(SinkMessage::Record(record)) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(SinkMessage::Record(record))) => {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(
                            queue = %self.name,
                            correlation_id = %record.correlation_id,
                            dropped_total = total,
                            "API log queue full, record dropped"
                        );
                        Ok(())
                    }
                    Err(_) => Err(()),
                }
            }
        };

        if result.is_err() {
            tracing::error!(queue = %self.name, "API log queue worker has stopped, record lost");
        }
    }

    async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        let sent = match &self.sender {
            QueueSender::Unbounded(sender) => sender.send(SinkMessage::Flush(tx)).is_ok(),
            QueueSender::Bounded(sender) => sender.send(SinkMessage::Flush(tx)).await.is_ok(),
        };
        if sent {
            let _ = rx.await;
        }
    }
}

async fn worker(
    name: Arc<str>,
    writer: Arc<dyn RecordWriter>,
    mut rx: QueueReceiver,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch: Vec<NewLogRecord> = Vec::with_capacity(batch_size);

    let mut flush_timer = tokio::time::interval(flush_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(SinkMessage::Record(record)) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        flush_batch(&name, writer.as_ref(), &mut batch).await;
                    }
                }
                Some(SinkMessage::Flush(done)) => {
                    flush_batch(&name, writer.as_ref(), &mut batch).await;
                    let _ = done.send(());
                }
                None => {
                    flush_batch(&name, writer.as_ref(), &mut batch).await;
                    break;
                }
            },

            _ = flush_timer.tick() => {
                flush_batch(&name, writer.as_ref(), &mut batch).await;
            }
        }
    }

    tracing::info!(queue = %name, "API log queue worker shutting down");
}

async fn flush_batch(name: &str, writer: &dyn RecordWriter, batch: &mut Vec<NewLogRecord>) {
    if batch.is_empty() {
        return;
    }

    let count = batch.len();
    let start = std::time::Instant::now();

    match writer.write_batch(batch).await {
        Ok(()) => {
            tracing::debug!(
                queue = %name,
                count = count,
                duration_ms = start.elapsed().as_millis() as u64,
                "Flushed API log batch"
            );
        }
        Err(e) => {
            tracing::error!(
                queue = %name,
                error = %format!("{:#}", e),
                count = count,
                "Failed to flush API log batch"
            );
        }
    }

    batch.clear();
}
