mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use booking_service::api::{create_router, AppState, AvailabilityResponse, ErrorResponse};
use booking_service::identity::GatewayHeaderIdentity;
use common::Harness;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shared::*;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn router(h: &Harness) -> Router {
    create_router(AppState {
        coordinator: h.coordinator.clone(),
        identity: Arc::new(GatewayHeaderIdentity::default()),
    })
}

fn request(method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send<T: DeserializeOwned>(app: Router, req: Request<Body>) -> (StatusCode, T) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn booking_body(h: &Harness, slot: &Slot, participants: i32) -> Value {
    json!({
        "experience_id": h.experience.id,
        "slot_id": slot.id,
        "participants": participants,
        "customer_name": "Grace Hopper",
        "customer_email": "grace@example.com",
        "special_requests": "Window seat"
    })
}

#[tokio::test]
async fn health_check_responds() {
    let h = Harness::new().await;
    let response = router(&h)
        .oneshot(request(Method::GET, "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn availability_endpoint_reports_capacity() {
    let h = Harness::new().await;
    let slot = h.slot(3, 5, 3).await;

    let uri = format!("/slots/{}/availability?participants=2", slot.id);
    let (status, body): (_, AvailabilityResponse) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.available);
    assert_eq!(body.remaining, 2);

    let uri = format!("/slots/{}/availability?participants=3", slot.id);
    let (status, body): (_, ErrorResponse) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.code, "insufficient_capacity");
    assert_eq!(body.remaining, Some(2));
    assert_eq!(body.error, "only 2 spots left");

    let uri = format!("/slots/{}/availability?participants=1", Uuid::new_v4());
    let (status, body): (_, ErrorResponse) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.code, "slot_not_found");
}

#[tokio::test]
async fn booking_requires_identity() {
    let h = Harness::new().await;
    let slot = h.slot(3, 5, 0).await;

    let (status, body): (_, ErrorResponse) = send(
        router(&h),
        request(Method::POST, "/bookings", None, Some(booking_body(&h, &slot, 1))),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body.code, "unauthorized");
    assert_eq!(h.current(slot.id).await.booked_participants, 0);
}

#[tokio::test]
async fn booking_lifecycle_over_http() {
    let h = Harness::new().await;
    let slot = h.slot(3, 4, 0).await;
    let user = Uuid::new_v4();

    let (status, created): (_, BookingDetails) = send(
        router(&h),
        request(Method::POST, "/bookings", Some(user), Some(booking_body(&h, &slot, 2))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created.booking.user_id, user);
    assert_eq!(created.booking.participants, 2);
    assert_eq!(created.booking.contact.special_requests.as_deref(), Some("Window seat"));
    let id = created.booking.id;

    let (status, body): (_, ErrorResponse) = send(
        router(&h),
        request(Method::POST, "/bookings", Some(user), Some(booking_body(&h, &slot, 1))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.code, "duplicate_booking");

    let uri = format!("/bookings/{id}");
    let (status, fetched): (_, BookingDetails) =
        send(router(&h), request(Method::GET, &uri, Some(user), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched.booking.id, id);

    let (status, body): (_, ErrorResponse) =
        send(router(&h), request(Method::GET, &uri, Some(Uuid::new_v4()), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.code, "not_found");

    let (status, updated): (_, BookingDetails) = send(
        router(&h),
        request(
            Method::PATCH,
            &uri,
            Some(user),
            Some(json!({ "customer_phone": "+1 555 0100" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated.booking.contact.customer_phone.as_deref(), Some("+1 555 0100"));

    let (status, body): (_, ErrorResponse) =
        send(router(&h), request(Method::DELETE, &uri, Some(user), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.code, "invalid_state");

    let (status, listed): (_, Vec<BookingDetails>) = send(
        router(&h),
        request(Method::GET, "/bookings?status=confirmed", Some(user), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.len(), 1);

    let cancel_uri = format!("/bookings/{id}/cancel");
    let (status, cancelled): (_, BookingDetails) =
        send(router(&h), request(Method::POST, &cancel_uri, Some(user), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert_eq!(h.current(slot.id).await.booked_participants, 0);

    let (status, body): (_, ErrorResponse) =
        send(router(&h), request(Method::POST, &cancel_uri, Some(user), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.code, "already_cancelled");

    let response = router(&h)
        .oneshot(request(Method::DELETE, &uri, Some(user), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, listed): (_, Vec<BookingDetails>) =
        send(router(&h), request(Method::GET, "/bookings", Some(user), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed.is_empty());
}

#[tokio::test]
async fn slots_and_integrity_endpoints() {
    let h = Harness::new().await;
    let open = h.slot(3, 5, 0).await;
    h.slot(4, 2, 2).await;
    h.coordinator
        .create_booking(h.request(Uuid::new_v4(), &open, 2))
        .await
        .unwrap();

    let uri = format!("/experiences/{}/slots", h.experience.id);
    let (status, slots): (_, Vec<Slot>) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].id, open.id);
    assert_eq!(slots[0].remaining(), 3);

    let uri = format!("/slots/{}/integrity", open.id);
    let (status, integrity): (_, SlotIntegrity) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(integrity.active_participants, 2);

    let mut drifted = h.current(open.id).await;
    drifted.booked_participants = 5;
    h.store.insert_slot(drifted).await;
    let (status, body): (_, ErrorResponse) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.code, "constraint_violation");
    assert_eq!(body.error, "internal server error");
}

#[tokio::test]
async fn transient_store_failure_asks_client_to_retry() {
    let h = Harness::new().await;
    let slot = h.slot(3, 5, 0).await;
    h.store.faults().fail_reserves(10);

    let (status, body): (_, ErrorResponse) = send(
        router(&h),
        request(
            Method::POST,
            "/bookings",
            Some(Uuid::new_v4()),
            Some(booking_body(&h, &slot, 1)),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.code, "transient_store_error");
    assert!(body.error.contains("try again"));
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let h = Harness::new().await;
    let slot = h.slot(3, 5, 0).await;
    let user = Some(Uuid::new_v4());

    let mut body = booking_body(&h, &slot, 1);
    body.as_object_mut().unwrap().remove("participants");
    let (status, error): (_, ErrorResponse) =
        send(router(&h), request(Method::POST, "/bookings", user, Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "invalid_request");
    assert!(error.error.contains("participants"));

    let broken = Request::builder()
        .method(Method::POST)
        .uri("/bookings")
        .header("x-user-id", Uuid::new_v4().to_string())
        .header("content-type", "application/json")
        .body(Body::from("{\"slot_id\": "))
        .unwrap();
    let (status, error): (_, ErrorResponse) = send(router(&h), broken).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "invalid_request");

    let (status, error): (_, ErrorResponse) = send(
        router(&h),
        request(Method::GET, "/bookings/not-a-uuid", user, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "invalid_request");

    let uri = format!("/slots/{}/availability?participants=many", slot.id);
    let (status, error): (_, ErrorResponse) =
        send(router(&h), request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "invalid_request");
    assert_eq!(h.current(slot.id).await.booked_participants, 0);
}
