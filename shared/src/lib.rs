use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod availability;
pub mod error;
pub mod reference;

pub use error::BookingError;

/// One bookable time window for one experience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub experience_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_participants: i32,
    pub booked_participants: i32,
    pub is_available: bool,
}

impl Slot {
    /// Spots still open, never negative.
    pub fn remaining(&self) -> i32 {
        (self.max_participants - self.booked_participants).max(0)
    }

    pub fn summary(&self) -> SlotSummary {
        SlotSummary {
            id: self.id,
            slot_date: self.slot_date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experience {
    pub id: Uuid,
    pub title: String,
    pub price: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Whether the booking still holds capacity that a cancellation may release.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    pub fn accepts_contact_update(&self) -> bool {
        !self.is_terminal()
    }

    /// Rows may only be hard-deleted once their capacity has been released.
    pub fn can_delete(&self) -> bool {
        matches!(self, BookingStatus::Cancelled)
    }

    /// Error reported when a cancellation is attempted from this status.
    pub fn cancellation_error(&self) -> BookingError {
        match self {
            BookingStatus::Cancelled => BookingError::AlreadyCancelled,
            BookingStatus::Completed => BookingError::AlreadyCompleted,
            other => BookingError::InvalidState(format!("cannot cancel a {} booking", other)),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(BookingError::ConstraintViolation(format!(
                "unknown booking status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(BookingError::ConstraintViolation(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub special_requests: Option<String>,
}

impl ContactInfo {
    pub fn validate(&self) -> Result<(), BookingError> {
        validate_name(&self.customer_name)?;
        validate_email(&self.customer_email)
    }

    /// Applies the fields present in `update`, leaving the rest untouched.
    pub fn apply(&mut self, update: &ContactUpdate) {
        if let Some(name) = &update.customer_name {
            self.customer_name = name.clone();
        }
        if let Some(email) = &update.customer_email {
            self.customer_email = email.clone();
        }
        if let Some(phone) = &update.customer_phone {
            self.customer_phone = Some(phone.clone());
        }
        if let Some(requests) = &update.special_requests {
            self.special_requests = Some(requests.clone());
        }
    }
}

/// Contact-field subset accepted by `updateBookingContact`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub special_requests: Option<String>,
}

impl ContactUpdate {
    pub fn is_empty(&self) -> bool {
        self.customer_name.is_none()
            && self.customer_email.is_none()
            && self.customer_phone.is_none()
            && self.special_requests.is_none()
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        if self.is_empty() {
            return Err(BookingError::InvalidRequest(
                "no contact fields to update".to_string(),
            ));
        }
        if let Some(name) = &self.customer_name {
            validate_name(name)?;
        }
        if let Some(email) = &self.customer_email {
            validate_email(email)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), BookingError> {
    if name.trim().is_empty() {
        return Err(BookingError::InvalidRequest(
            "customer name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), BookingError> {
    let valid = match email.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    };
    if !valid {
        return Err(BookingError::InvalidRequest(format!(
            "'{}' is not a valid email address",
            email
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub booking_reference: String,
    pub user_id: Uuid,
    pub experience_id: Uuid,
    pub slot_id: Uuid,
    pub participants: i32,
    pub total_amount: BigDecimal,
    pub currency: String,
    #[serde(flatten)]
    pub contact: ContactInfo,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A booking joined with the slot and experience fields the app displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub slot: SlotSummary,
    pub experience: Experience,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub upcoming_only: bool,
}

pub fn total_amount(price: &BigDecimal, participants: i32) -> BigDecimal {
    price * &BigDecimal::from(participants)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    Confirmed,
    Cancelled,
}

/// Published to the notification sink after a booking commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub id: Uuid,
    pub kind: BookingEventKind,
    pub booking: BookingDetails,
    pub occurred_at: DateTime<Utc>,
}

impl BookingEvent {
    pub fn new(kind: BookingEventKind, booking: BookingDetails) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            booking,
            occurred_at: Utc::now(),
        }
    }
}

/// Out-of-band payment status change reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: Uuid,
    pub booking_id: Uuid,
    pub status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Applied { booking_id: Uuid, payment_status: PaymentStatus },
    Duplicate,
    UnknownBooking,
}

/// Counter snapshot of a slot next to the participant sum of its live bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotIntegrity {
    pub slot: Slot,
    pub active_participants: i64,
}

impl SlotIntegrity {
    pub fn verify(&self) -> Result<(), BookingError> {
        availability::check_integrity(&self.slot)?;
        if self.active_participants != i64::from(self.slot.booked_participants) {
            return Err(BookingError::ConstraintViolation(format!(
                "slot {} counts {} booked participants but its active bookings hold {}",
                self.slot.id, self.slot.booked_participants, self.active_participants
            )));
        }
        Ok(())
    }
}
