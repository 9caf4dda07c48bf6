//! Bounded reads of the Kafka Connect configs and status topics.
//!
//! Every partition read is bounded by an offset range, a message cap and a
//! timeout, so a scan terminates even while the topics are being written.
//! A failure reading one partition is logged and only that partition is
//! abandoned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::ScanConfig;
use crate::domain::connector::{
    merge_connectors, ConnectorConfigFold, ConnectorStatusFold, ScanRecord, SelfManagedConnectors,
};
use crate::domain::topic::Topics;
use crate::error::{KafkaError, KafkaResult};
use crate::infrastructure::kafka::iam::ScanContext;

/// Positioned reads over the partitions of one topic at a time.
#[async_trait]
pub trait PartitionSource: Send {
    async fn partitions(&mut self, topic: &str) -> KafkaResult<Vec<i32>>;

    /// `(oldest, newest)` offsets; newest is one past the last record.
    async fn watermarks(&mut self, topic: &str, partition: i32) -> KafkaResult<(i64, i64)>;

    /// Read `partition` from `offset`, replacing any earlier position.
    async fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()>;

    /// The next record, or `None` when nothing arrives within `wait`.
    async fn next_record(&mut self, wait: Duration) -> KafkaResult<Option<ScanRecord>>;

    async fn close(&mut self) {}
}

/// [`PartitionSource`] over an rdkafka consumer with manual assignment.
pub struct ConsumerPartitionSource {
    consumer: Arc<StreamConsumer<ScanContext>>,
    metadata_timeout: Duration,
}

impl ConsumerPartitionSource {
    /// `config` carries bootstrap and security settings; group and offset
    /// handling are set here.
    pub fn new(
        mut config: ClientConfig,
        context: ScanContext,
        metadata_timeout: Duration,
    ) -> KafkaResult<Self> {
        config
            .set("group.id", format!("kafka-fleet-scan-{}", uuid::Uuid::new_v4()))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false");

        let consumer: StreamConsumer<ScanContext> = config.create_with_context(context)?;
        Ok(Self {
            consumer: Arc::new(consumer),
            metadata_timeout,
        })
    }

    /// Run a blocking librdkafka call off the async workers.
    async fn blocking<T, F>(&self, call: F) -> KafkaResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StreamConsumer<ScanContext>, Duration) -> Result<T, rdkafka::error::KafkaError>
            + Send
            + 'static,
    {
        let consumer = self.consumer.clone();
        let timeout = self.metadata_timeout;
        tokio::task::spawn_blocking(move || call(consumer.as_ref(), timeout))
            .await
            .map_err(|e| KafkaError::Config(format!("consumer task failed: {e}")))?
            .map_err(KafkaError::from)
    }
}

#[async_trait]
impl PartitionSource for ConsumerPartitionSource {
    async fn partitions(&mut self, topic: &str) -> KafkaResult<Vec<i32>> {
        let name = topic.to_string();
        self.blocking(move |consumer, timeout| {
            let metadata = consumer.fetch_metadata(Some(&name), timeout)?;
            Ok(metadata
                .topics()
                .iter()
                .find(|t| t.name() == name)
                .map(|t| t.partitions().iter().map(|p| p.id()).collect())
                .unwrap_or_default())
        })
        .await
    }

    async fn watermarks(&mut self, topic: &str, partition: i32) -> KafkaResult<(i64, i64)> {
        let name = topic.to_string();
        self.blocking(move |consumer, timeout| consumer.fetch_watermarks(&name, partition, timeout))
            .await
    }

    async fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(topic, partition, Offset::Offset(offset))?;
        self.consumer.assign(&assignment)?;
        Ok(())
    }

    async fn next_record(&mut self, wait: Duration) -> KafkaResult<Option<ScanRecord>> {
        tokio::select! {
            received = self.consumer.recv() => {
                let message = received?;
                Ok(Some(ScanRecord {
                    partition: message.partition(),
                    offset: message.offset(),
                    timestamp: message.timestamp().to_millis(),
                    key: message.key().map(<[u8]>::to_vec),
                    payload: message.payload().map(<[u8]>::to_vec),
                }))
            }
            _ = tokio::time::sleep(wait) => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.consumer.unassign().ok();
        debug!("scan consumer closed");
    }
}

/// Recovers self-managed connectors from the Connect internal topics.
pub struct PartitionScanner<'a> {
    config: &'a ScanConfig,
}

impl<'a> PartitionScanner<'a> {
    pub fn new(config: &'a ScanConfig) -> Self {
        Self { config }
    }

    /// Topics absent from `topics` contribute nothing.
    #[instrument(skip_all)]
    pub async fn scan<S>(&self, source: &mut S, topics: &Topics) -> KafkaResult<SelfManagedConnectors>
    where
        S: PartitionSource + ?Sized,
    {
        let configs_topic = self.config.connect_configs_topic.as_str();
        if !topics.contains(configs_topic) {
            debug!(topic = configs_topic, "configs topic not present, no connectors");
            return Ok(SelfManagedConnectors::default());
        }
        let configs = self.scan_configs(source, configs_topic).await?;

        let status_topic = self.config.connect_status_topic.as_str();
        let statuses = if topics.contains(status_topic) {
            self.scan_statuses(source, status_topic).await?
        } else {
            debug!(topic = status_topic, "status topic not present, states unknown");
            ConnectorStatusFold::default()
        };

        let connectors = merge_connectors(configs, &statuses);
        info!(connectors = connectors.len(), "recovered self-managed connectors");
        Ok(SelfManagedConnectors { connectors })
    }

    /// Reads exactly the records between the watermarks of each partition.
    async fn scan_configs<S>(&self, source: &mut S, topic: &str) -> KafkaResult<ConnectorConfigFold>
    where
        S: PartitionSource + ?Sized,
    {
        let mut fold = ConnectorConfigFold::default();
        let wait = self.config.config_read_timeout();

        for partition in source.partitions(topic).await? {
            let Some((oldest, newest)) = open_partition(source, topic, partition).await else {
                continue;
            };

            let expected = newest - oldest;
            let mut read = 0;
            while read < expected {
                match source.next_record(wait).await {
                    Ok(Some(record)) => {
                        read += 1;
                        fold.apply(&record);
                        if record.offset >= newest - 1 {
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!(topic, partition, read, expected, "timed out reading partition");
                        break;
                    }
                    Err(e) => {
                        warn!(topic, partition, read, error = %e, "error reading partition");
                        break;
                    }
                }
            }
            debug!(topic, partition, read, "config partition scanned");
        }
        Ok(fold)
    }

    /// Reads each partition from its oldest record up to the message cap or
    /// the wall-clock budget, whichever comes first.
    async fn scan_statuses<S>(&self, source: &mut S, topic: &str) -> KafkaResult<ConnectorStatusFold>
    where
        S: PartitionSource + ?Sized,
    {
        let mut fold = ConnectorStatusFold::default();
        let cap = self.config.status_message_cap;

        for partition in source.partitions(topic).await? {
            let Some((_, newest)) = open_partition(source, topic, partition).await else {
                continue;
            };

            let deadline = Instant::now() + self.config.status_read_timeout();
            let mut read = 0u64;
            while read < cap {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(topic, partition, read, "status read budget spent");
                    break;
                }
                match source.next_record(remaining).await {
                    Ok(Some(record)) => {
                        read += 1;
                        fold.apply(&record);
                        if record.offset >= newest - 1 {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(topic, partition, read, error = %e, "error reading partition");
                        break;
                    }
                }
            }
            debug!(topic, partition, read, "status partition scanned");
        }
        Ok(fold)
    }
}

/// Position `source` at the oldest record of a non-empty partition.
async fn open_partition<S>(source: &mut S, topic: &str, partition: i32) -> Option<(i64, i64)>
where
    S: PartitionSource + ?Sized,
{
    let (oldest, newest) = match source.watermarks(topic, partition).await {
        Ok(marks) => marks,
        Err(e) => {
            warn!(topic, partition, error = %e, "failed to fetch watermarks");
            return None;
        }
    };
    if newest <= oldest {
        debug!(topic, partition, oldest, newest, "empty partition skipped");
        return None;
    }
    if let Err(e) = source.seek(topic, partition, oldest).await {
        warn!(topic, partition, error = %e, "failed to position consumer");
        return None;
    }
    Some((oldest, newest))
}
