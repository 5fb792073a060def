use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use shared::{Booking, BookingDetails, BookingStatus, ContactInfo, ContactUpdate, Experience, PaymentStatus, Slot};
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::experiences)]
pub struct ExperienceRow {
    pub id: Uuid,
    pub title: String,
    pub price: bigdecimal::BigDecimal,
    pub currency: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::slots)]
pub struct SlotRow {
    pub id: Uuid,
    pub experience_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_participants: i32,
    pub booked_participants: i32,
    pub is_available: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct BookingRow {
    pub id: Uuid,
    pub booking_reference: String,
    pub user_id: Uuid,
    pub experience_id: Uuid,
    pub slot_id: Uuid,
    pub participants: i32,
    pub total_amount: bigdecimal::BigDecimal,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub special_requests: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewBookingRow {
    pub id: Uuid,
    pub booking_reference: String,
    pub user_id: Uuid,
    pub experience_id: Uuid,
    pub slot_id: Uuid,
    pub participants: i32,
    pub total_amount: bigdecimal::BigDecimal,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub special_requests: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `None` fields are left untouched by diesel.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::bookings)]
pub struct ContactChangeset {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub special_requests: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ContactChangeset {
    pub fn new(update: ContactUpdate, now: DateTime<Utc>) -> Self {
        Self {
            customer_name: update.customer_name,
            customer_email: update.customer_email,
            customer_phone: update.customer_phone,
            special_requests: update.special_requests,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::bookings)]
pub struct PaymentChangeset {
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::processed_payment_events)]
pub struct ProcessedPaymentEvent {
    pub event_id: Uuid,
    pub booking_id: Uuid,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

impl From<ExperienceRow> for Experience {
    fn from(row: ExperienceRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            price: row.price,
            currency: row.currency,
        }
    }
}

impl From<SlotRow> for Slot {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id,
            experience_id: row.experience_id,
            slot_date: row.slot_date,
            start_time: row.start_time,
            end_time: row.end_time,
            max_participants: row.max_participants,
            booked_participants: row.booked_participants,
            is_available: row.is_available,
        }
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status: BookingStatus = row
            .status
            .parse()
            .map_err(|e: shared::BookingError| StoreError::Integrity(e.to_string()))?;
        let payment_status: PaymentStatus = row
            .payment_status
            .parse()
            .map_err(|e: shared::BookingError| StoreError::Integrity(e.to_string()))?;

        Ok(Self {
            id: row.id,
            booking_reference: row.booking_reference,
            user_id: row.user_id,
            experience_id: row.experience_id,
            slot_id: row.slot_id,
            participants: row.participants,
            total_amount: row.total_amount,
            currency: row.currency,
            contact: ContactInfo {
                customer_name: row.customer_name,
                customer_email: row.customer_email,
                customer_phone: row.customer_phone,
                special_requests: row.special_requests,
            },
            status,
            payment_status,
            payment_intent_id: row.payment_intent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

impl From<&Booking> for NewBookingRow {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            booking_reference: booking.booking_reference.clone(),
            user_id: booking.user_id,
            experience_id: booking.experience_id,
            slot_id: booking.slot_id,
            participants: booking.participants,
            total_amount: booking.total_amount.clone(),
            currency: booking.currency.clone(),
            customer_name: booking.contact.customer_name.clone(),
            customer_email: booking.contact.customer_email.clone(),
            customer_phone: booking.contact.customer_phone.clone(),
            special_requests: booking.contact.special_requests.clone(),
            status: booking.status.as_str().to_string(),
            payment_status: booking.payment_status.as_str().to_string(),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

pub fn join_details(
    (booking, slot, experience): (BookingRow, SlotRow, ExperienceRow),
) -> Result<BookingDetails, StoreError> {
    Ok(BookingDetails {
        booking: booking.try_into()?,
        slot: Slot::from(slot).summary(),
        experience: experience.into(),
    })
}
