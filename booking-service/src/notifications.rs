use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::BookingEvent;
use std::time::Duration;

/// Best-effort outlet for booking confirmations and cancellations. A failed
/// publish never affects the booking it describes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &BookingEvent) -> Result<()>;
}

pub struct KafkaNotificationSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotificationSink {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl NotificationSink for KafkaNotificationSink {
    async fn publish(&self, event: &BookingEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let key = event.booking.booking.id.to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish booking event: {}", e))?;

        Ok(())
    }
}
