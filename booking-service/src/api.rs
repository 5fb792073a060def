use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::coordinator::{BookingCoordinator, CreateBooking};
use crate::identity::IdentityProvider;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BookingCoordinator>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// The caller's user id, as resolved by the configured identity provider.
pub struct AuthenticatedUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(AuthenticatedUser(state.identity.user_id(&parts.headers)?))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i32>,
}

#[derive(Debug)]
pub struct ApiError(pub BookingError);

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, message) = match &err {
            BookingError::SlotNotFound
            | BookingError::ExperienceNotFound
            | BookingError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
            BookingError::SlotUnavailable
            | BookingError::InsufficientCapacity { .. }
            | BookingError::DuplicateBooking
            | BookingError::AlreadyCancelled
            | BookingError::AlreadyCompleted
            | BookingError::InvalidState(_) => (StatusCode::CONFLICT, err.to_string()),
            BookingError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
            BookingError::Unauthorized => (StatusCode::UNAUTHORIZED, err.to_string()),
            BookingError::TransientStore(detail) => {
                tracing::warn!("Store unavailable: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service temporarily unavailable, please try again".to_string(),
                )
            }
            BookingError::ConstraintViolation(_) | BookingError::Internal(_) => {
                tracing::error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let remaining = match &err {
            BookingError::InsufficientCapacity { remaining } => Some(*remaining),
            _ => None,
        };

        let body = ErrorResponse {
            error: message,
            code: err.code().to_string(),
            remaining,
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(BookingError::InvalidRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(BookingError::InvalidRequest(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(BookingError::InvalidRequest(rejection.body_text()))
    }
}

/// `Json` whose rejection is reported as an [`ErrorResponse`].
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub experience_id: Uuid,
    pub slot_id: Uuid,
    pub participants: i32,
    #[serde(flatten)]
    pub contact: ContactInfo,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub from: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub participants: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    pub remaining: i32,
    pub slot: Slot,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/experiences/:experience_id/slots", get(list_slots))
        .route("/slots/:slot_id/availability", get(check_availability))
        .route("/slots/:slot_id/integrity", get(verify_slot))
        .route("/bookings", post(create_booking).get(list_bookings))
        .route(
            "/bookings/:booking_id",
            get(get_booking).patch(update_booking).delete(delete_booking),
        )
        .route("/bookings/:booking_id/cancel", post(cancel_booking))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_slots(
    State(state): State<AppState>,
    ApiPath(experience_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let slots = state.coordinator.available_slots(experience_id, query.from).await?;
    Ok(Json(slots))
}

pub async fn check_availability(
    State(state): State<AppState>,
    ApiPath(slot_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let slot = state
        .coordinator
        .check_availability(slot_id, query.participants)
        .await?;

    Ok(Json(AvailabilityResponse {
        available: true,
        remaining: slot.remaining(),
        slot,
    }))
}

pub async fn verify_slot(
    State(state): State<AppState>,
    ApiPath(slot_id): ApiPath<Uuid>,
) -> Result<Json<SlotIntegrity>, ApiError> {
    Ok(Json(state.coordinator.verify_slot(slot_id).await?))
}

pub async fn create_booking(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ApiJson(request): ApiJson<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingDetails>), ApiError> {
    let details = state
        .coordinator
        .create_booking(CreateBooking {
            user_id,
            experience_id: request.experience_id,
            slot_id: request.slot_id,
            participants: request.participants,
            contact: request.contact,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(details)))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ApiQuery(filter): ApiQuery<BookingFilter>,
) -> Result<Json<Vec<BookingDetails>>, ApiError> {
    Ok(Json(state.coordinator.list_user_bookings(user_id, filter).await?))
}

pub async fn get_booking(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ApiPath(booking_id): ApiPath<Uuid>,
) -> Result<Json<BookingDetails>, ApiError> {
    state
        .coordinator
        .get_booking(booking_id, Some(user_id))
        .await?
        .map(Json)
        .ok_or(ApiError(BookingError::NotFound))
}

pub async fn update_booking(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ApiPath(booking_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<ContactUpdate>,
) -> Result<Json<BookingDetails>, ApiError> {
    let details = state
        .coordinator
        .update_booking_contact(booking_id, user_id, update)
        .await?;
    Ok(Json(details))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ApiPath(booking_id): ApiPath<Uuid>,
) -> Result<Json<BookingDetails>, ApiError> {
    Ok(Json(state.coordinator.cancel_booking(booking_id, user_id).await?))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ApiPath(booking_id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.delete_booking(booking_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
