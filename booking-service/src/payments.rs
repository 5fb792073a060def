use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::{BookingError, PaymentEvent, PaymentOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::coordinator::BookingCoordinator;

const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Whether the offset of a handled payment message may be committed.
///
/// A retryable failure leaves the event unapplied, so the message has to be
/// handled again. Anything else is final for that message.
pub fn should_commit(result: &Result<Option<PaymentOutcome>, BookingError>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => !err.is_retryable(),
    }
}

/// Applies payment status changes published by the payment provider.
pub struct PaymentEventHandler {
    coordinator: Arc<BookingCoordinator>,
    redelivery_delay: Duration,
}

impl PaymentEventHandler {
    pub fn new(coordinator: Arc<BookingCoordinator>) -> Self {
        Self {
            coordinator,
            redelivery_delay: REDELIVERY_DELAY,
        }
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => {
                                self.apply_until_settled(json_str).await;
                            }
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    /// Handles one payload, re-applying it for as long as the failure is
    /// retryable. Returns once its offset can be committed.
    pub async fn apply_until_settled(&self, json_str: &str) -> Option<PaymentOutcome> {
        loop {
            let result = self.handle_payload(json_str).await;
            if should_commit(&result) {
                return match result {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Dropping payment event: {}", e);
                        None
                    }
                };
            }
            if let Err(e) = result {
                warn!("Payment event not applied, redelivering: {}", e);
            }
            tokio::time::sleep(self.redelivery_delay).await;
        }
    }

    pub async fn handle_payload(&self, json_str: &str) -> Result<Option<PaymentOutcome>, BookingError> {
        let event = match serde_json::from_str::<PaymentEvent>(json_str) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed payment event: {}", e);
                return Ok(None);
            }
        };

        self.coordinator.apply_payment_event(event).await.map(Some)
    }
}
