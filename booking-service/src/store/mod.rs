//! Persistence seam for slots, bookings and the experience catalog.
//!
//! Every method that mutates capacity runs as one store transaction: either
//! all of its writes commit or none do.

mod memory;
mod postgres;

pub use memory::{FaultPlan, InMemoryStore};
pub use postgres::{DbPool, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use shared::{
    Booking, BookingDetails, BookingError, BookingFilter, BookingStatus, ContactUpdate,
    Experience, PaymentEvent, PaymentOutcome, Slot, SlotIntegrity,
};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

pub const ACTIVE_BOOKING_INDEX: &str = "bookings_active_slot_user_idx";
pub const BOOKING_REFERENCE_KEY: &str = "bookings_booking_reference_key";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("store call `{0}` timed out")]
    Timeout(&'static str),

    #[error("transient database failure: {0}")]
    Transient(String),

    #[error("an active booking already exists for this user and slot")]
    DuplicateActiveBooking,

    #[error("booking reference already in use")]
    ReferenceTaken,

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Database(DieselError),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Pool(_) | StoreError::Timeout(_) | StoreError::Transient(_)
        )
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => match info.constraint_name() {
                        Some(ACTIVE_BOOKING_INDEX) => StoreError::DuplicateActiveBooking,
                        Some(BOOKING_REFERENCE_KEY) => StoreError::ReferenceTaken,
                        _ => StoreError::Integrity(message),
                    },
                    DatabaseErrorKind::CheckViolation
                    | DatabaseErrorKind::ForeignKeyViolation
                    | DatabaseErrorKind::NotNullViolation => StoreError::Integrity(message),
                    DatabaseErrorKind::SerializationFailure
                    | DatabaseErrorKind::ClosedConnection
                    | DatabaseErrorKind::UnableToSendCommand => StoreError::Transient(message),
                    _ => StoreError::Database(DieselError::DatabaseError(kind, info)),
                }
            }
            DieselError::BrokenTransactionManager => {
                StoreError::Transient("transaction manager is broken".to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for StoreError {
    fn from(err: bb8::RunError<E>) -> Self {
        StoreError::Pool(err.to_string())
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Pool(_) | StoreError::Timeout(_) | StoreError::Transient(_) => {
                BookingError::TransientStore(err.to_string())
            }
            StoreError::DuplicateActiveBooking => BookingError::DuplicateBooking,
            StoreError::ReferenceTaken => {
                BookingError::Internal("could not allocate a unique booking reference".to_string())
            }
            StoreError::Integrity(detail) => BookingError::ConstraintViolation(detail),
            StoreError::Database(e) => BookingError::Internal(e.to_string()),
        }
    }
}

/// A fully formed booking waiting for its slot capacity.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking: Booking,
    /// Slots dated before this day are not bookable.
    pub today: NaiveDate,
}

#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Reserved { booking: Booking, slot: Slot },
    /// The conditional capacity update matched nothing; carries the slot as
    /// re-read inside the same transaction, if it exists.
    Rejected(Option<Slot>),
}

/// Result of a guarded write on one booking owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome<T> {
    Applied(T),
    /// Absent, or owned by someone else.
    NotFound,
    /// The booking's status forbids the write.
    Rejected(BookingStatus),
}

#[async_trait]
pub trait ExperienceCatalog: Send + Sync {
    async fn experience(&self, experience_id: Uuid) -> Result<Option<Experience>, StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError>;

    /// Bookable slots of an experience dated `from` or later.
    async fn available_slots(
        &self,
        experience_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError>;

    async fn slot_integrity(&self, slot_id: Uuid) -> Result<Option<SlotIntegrity>, StoreError>;

    async fn booking(&self, booking_id: Uuid) -> Result<Option<BookingDetails>, StoreError>;

    async fn user_bookings(
        &self,
        user_id: Uuid,
        filter: BookingFilter,
        today: NaiveDate,
    ) -> Result<Vec<BookingDetails>, StoreError>;

    async fn has_active_booking(&self, user_id: Uuid, slot_id: Uuid) -> Result<bool, StoreError>;

    /// Conditionally takes capacity on the slot and inserts the booking, atomically.
    async fn reserve(&self, reservation: Reservation) -> Result<ReserveOutcome, StoreError>;

    /// Flips the booking to cancelled and gives its participants back to the slot.
    async fn cancel(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerOutcome<BookingDetails>, StoreError>;

    async fn update_contact(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        update: ContactUpdate,
        now: DateTime<Utc>,
    ) -> Result<LedgerOutcome<BookingDetails>, StoreError>;

    async fn delete(&self, booking_id: Uuid, user_id: Uuid) -> Result<LedgerOutcome<()>, StoreError>;

    /// Records a payment status change once per event id.
    async fn apply_payment(
        &self,
        event: PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, StoreError>;

    /// Marks confirmed bookings on slots dated before `before` as completed.
    async fn complete_elapsed(&self, before: NaiveDate, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Counter value after giving `participants` back to a slot, floored at zero.
pub(crate) fn released_count(slot_id: Uuid, booked: i32, participants: i32) -> i32 {
    let restored = booked - participants;
    if restored < 0 {
        error!(
            slot_id = %slot_id,
            booked,
            participants,
            "slot counter would underflow on cancellation; flooring at zero"
        );
    }
    restored.max(0)
}
