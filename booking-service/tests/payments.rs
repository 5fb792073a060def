mod common;

use booking_service::payments::{should_commit, PaymentEventHandler};
use booking_service::store::BookingStore;
use chrono::Utc;
use common::Harness;
use serde_json::json;
use shared::*;
use std::time::Duration;
use uuid::Uuid;

async fn confirmed_booking(h: &Harness) -> BookingDetails {
    let slot = h.slot(3, 5, 0).await;
    h.coordinator
        .create_booking(h.request(Uuid::new_v4(), &slot, 1))
        .await
        .unwrap()
}

fn paid_event(booking_id: Uuid) -> String {
    json!({
        "event_id": Uuid::new_v4(),
        "booking_id": booking_id,
        "status": PaymentStatus::Paid,
        "payment_intent_id": "pi_456",
        "occurred_at": Utc::now(),
    })
    .to_string()
}

#[tokio::test]
async fn retryable_failure_keeps_the_message_uncommitted() {
    let h = Harness::new().await;
    let details = confirmed_booking(&h).await;
    let handler = PaymentEventHandler::new(h.coordinator.clone());
    let payload = paid_event(details.booking.id);

    h.store.faults().fail_payments(10);
    let result = handler.handle_payload(&payload).await;
    assert!(matches!(result, Err(BookingError::TransientStore(_))));
    assert!(!should_commit(&result));

    let stored = h.store.booking(details.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.booking.payment_status, PaymentStatus::Pending);

    h.store.faults().fail_payments(0);
    let result = handler.handle_payload(&payload).await;
    assert!(should_commit(&result));
    assert_eq!(
        result.unwrap(),
        Some(PaymentOutcome::Applied {
            booking_id: details.booking.id,
            payment_status: PaymentStatus::Paid,
        })
    );

    let stored = h.store.booking(details.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.booking.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn payload_is_reapplied_until_the_store_recovers() {
    let h = Harness::new().await;
    let details = confirmed_booking(&h).await;
    let handler = PaymentEventHandler::new(h.coordinator.clone())
        .with_redelivery_delay(Duration::from_millis(1));

    // Outlasts the coordinator's own retries twice over.
    h.store.faults().fail_payments(10);
    let outcome = handler
        .apply_until_settled(&paid_event(details.booking.id))
        .await;

    assert_eq!(
        outcome,
        Some(PaymentOutcome::Applied {
            booking_id: details.booking.id,
            payment_status: PaymentStatus::Paid,
        })
    );
    let stored = h.store.booking(details.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.booking.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.booking.payment_intent_id.as_deref(), Some("pi_456"));
}

#[tokio::test]
async fn malformed_and_unknown_events_are_committed() {
    let h = Harness::new().await;
    let handler = PaymentEventHandler::new(h.coordinator.clone());

    let result = handler.handle_payload("{\"event_id\": 42").await;
    assert!(should_commit(&result));
    assert_eq!(result.unwrap(), None);

    let result = handler.handle_payload(&paid_event(Uuid::new_v4())).await;
    assert!(should_commit(&result));
    assert_eq!(result.unwrap(), Some(PaymentOutcome::UnknownBooking));
}

#[test]
fn permanent_failures_are_committed() {
    assert!(should_commit(&Err(BookingError::ConstraintViolation(
        "booking row is corrupt".to_string()
    ))));
    assert!(should_commit(&Err(BookingError::Internal("bad row".to_string()))));
    assert!(!should_commit(&Err(BookingError::TransientStore(
        "pool timed out".to_string()
    ))));
}
