use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    Booking, BookingDetails, BookingFilter, BookingStatus, ContactUpdate, Experience,
    PaymentEvent, PaymentOutcome, Slot, SlotIntegrity,
};
use tracing::debug;
use uuid::Uuid;

use super::{
    released_count, BookingStore, ExperienceCatalog, LedgerOutcome, Reservation, ReserveOutcome,
    StoreError,
};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Postgres-backed store. Capacity is taken with a single conditional
/// `UPDATE ... RETURNING` so concurrent bookers serialize on the slot row.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_details(
    conn: &mut AsyncPgConnection,
    booking_id: Uuid,
) -> Result<Option<BookingDetails>, StoreError> {
    let row = bookings::table
        .inner_join(slots::table)
        .inner_join(experiences::table)
        .filter(bookings::id.eq(booking_id))
        .first::<(BookingRow, SlotRow, ExperienceRow)>(conn)
        .await
        .optional()?;

    row.map(join_details).transpose()
}

async fn lock_owned_booking(
    conn: &mut AsyncPgConnection,
    booking_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Booking>, StoreError> {
    let row = bookings::table
        .filter(bookings::id.eq(booking_id))
        .filter(bookings::user_id.eq(user_id))
        .for_update()
        .first::<BookingRow>(conn)
        .await
        .optional()?;

    row.map(Booking::try_from).transpose()
}

#[async_trait]
impl ExperienceCatalog for PgStore {
    async fn experience(&self, experience_id: Uuid) -> Result<Option<Experience>, StoreError> {
        let mut conn = self.pool.get().await?;

        let row = experiences::table
            .find(experience_id)
            .first::<ExperienceRow>(&mut conn)
            .await
            .optional()?;

        Ok(row.map(Experience::from))
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        let mut conn = self.pool.get().await?;

        let row = slots::table
            .find(slot_id)
            .first::<SlotRow>(&mut conn)
            .await
            .optional()?;

        Ok(row.map(Slot::from))
    }

    async fn available_slots(
        &self,
        experience_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows = slots::table
            .filter(slots::experience_id.eq(experience_id))
            .filter(slots::slot_date.ge(from))
            .filter(slots::is_available.eq(true))
            .order((slots::slot_date.asc(), slots::start_time.asc()))
            .load::<SlotRow>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(Slot::from).collect())
    }

    async fn slot_integrity(&self, slot_id: Uuid) -> Result<Option<SlotIntegrity>, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                // Both reads must see the same snapshot.
                diesel::sql_query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
                    .execute(conn)
                    .await?;

                let slot = slots::table
                    .find(slot_id)
                    .first::<SlotRow>(conn)
                    .await
                    .optional()?;

                let Some(slot) = slot else {
                    return Ok(None);
                };

                let active = bookings::table
                    .filter(bookings::slot_id.eq(slot_id))
                    .filter(bookings::status.ne(BookingStatus::Cancelled.as_str()))
                    .select(diesel::dsl::sum(bookings::participants))
                    .first::<Option<i64>>(conn)
                    .await?;

                Ok(Some(SlotIntegrity {
                    slot: slot.into(),
                    active_participants: active.unwrap_or(0),
                }))
            })
        })
        .await
    }

    async fn booking(&self, booking_id: Uuid) -> Result<Option<BookingDetails>, StoreError> {
        let mut conn = self.pool.get().await?;
        load_details(&mut conn, booking_id).await
    }

    async fn user_bookings(
        &self,
        user_id: Uuid,
        filter: BookingFilter,
        today: NaiveDate,
    ) -> Result<Vec<BookingDetails>, StoreError> {
        let mut conn = self.pool.get().await?;

        let mut query = bookings::table
            .inner_join(slots::table)
            .inner_join(experiences::table)
            .filter(bookings::user_id.eq(user_id))
            .into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(bookings::status.eq(status.as_str()));
        }
        if filter.upcoming_only {
            query = query.filter(slots::slot_date.ge(today));
        }

        let rows = query
            .order(bookings::created_at.desc())
            .load::<(BookingRow, SlotRow, ExperienceRow)>(&mut conn)
            .await?;

        rows.into_iter().map(join_details).collect()
    }

    async fn has_active_booking(&self, user_id: Uuid, slot_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let exists = diesel::select(diesel::dsl::exists(
            bookings::table
                .filter(bookings::user_id.eq(user_id))
                .filter(bookings::slot_id.eq(slot_id))
                .filter(bookings::status.ne(BookingStatus::Cancelled.as_str())),
        ))
        .get_result::<bool>(&mut conn)
        .await?;

        Ok(exists)
    }

    async fn reserve(&self, reservation: Reservation) -> Result<ReserveOutcome, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let booking = reservation.booking;
                let requested = booking.participants;
                let now = booking.created_at;

                let reserved = diesel::update(
                    slots::table
                        .filter(slots::id.eq(booking.slot_id))
                        .filter(slots::is_available.eq(true))
                        .filter(slots::slot_date.ge(reservation.today))
                        .filter((slots::booked_participants + requested).le(slots::max_participants)),
                )
                .set((
                    slots::booked_participants.eq(slots::booked_participants + requested),
                    slots::is_available
                        .eq((slots::booked_participants + requested).lt(slots::max_participants)),
                    slots::updated_at.eq(now),
                ))
                .get_result::<SlotRow>(conn)
                .await
                .optional()?;

                let Some(slot) = reserved else {
                    let current = slots::table
                        .find(booking.slot_id)
                        .first::<SlotRow>(conn)
                        .await
                        .optional()?;
                    debug!("Conditional capacity update matched no row for slot {}", booking.slot_id);
                    return Ok(ReserveOutcome::Rejected(current.map(Slot::from)));
                };

                // A unique violation here rolls back the capacity update above.
                let inserted = diesel::insert_into(bookings::table)
                    .values(&NewBookingRow::from(&booking))
                    .get_result::<BookingRow>(conn)
                    .await?;

                Ok(ReserveOutcome::Reserved {
                    booking: inserted.try_into()?,
                    slot: slot.into(),
                })
            })
        })
        .await
    }

    async fn cancel(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerOutcome<BookingDetails>, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let Some(booking) = lock_owned_booking(conn, booking_id, user_id).await? else {
                    return Ok(LedgerOutcome::NotFound);
                };
                if !booking.status.can_cancel() {
                    return Ok(LedgerOutcome::Rejected(booking.status));
                }

                let slot = slots::table
                    .find(booking.slot_id)
                    .for_update()
                    .first::<SlotRow>(conn)
                    .await?;
                let restored = released_count(slot.id, slot.booked_participants, booking.participants);

                diesel::update(slots::table.find(slot.id))
                    .set((
                        slots::booked_participants.eq(restored),
                        slots::is_available.eq(true),
                        slots::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                diesel::update(bookings::table.find(booking.id))
                    .set((
                        bookings::status.eq(BookingStatus::Cancelled.as_str()),
                        bookings::cancelled_at.eq(now),
                        bookings::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                let details = load_details(conn, booking.id).await?.ok_or_else(|| {
                    StoreError::Integrity(format!("booking {} vanished inside its own transaction", booking.id))
                })?;

                Ok(LedgerOutcome::Applied(details))
            })
        })
        .await
    }

    async fn update_contact(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        update: ContactUpdate,
        now: DateTime<Utc>,
    ) -> Result<LedgerOutcome<BookingDetails>, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let Some(booking) = lock_owned_booking(conn, booking_id, user_id).await? else {
                    return Ok(LedgerOutcome::NotFound);
                };
                if !booking.status.accepts_contact_update() {
                    return Ok(LedgerOutcome::Rejected(booking.status));
                }

                diesel::update(bookings::table.find(booking.id))
                    .set(&ContactChangeset::new(update, now))
                    .execute(conn)
                    .await?;

                let details = load_details(conn, booking.id).await?.ok_or_else(|| {
                    StoreError::Integrity(format!("booking {} vanished inside its own transaction", booking.id))
                })?;

                Ok(LedgerOutcome::Applied(details))
            })
        })
        .await
    }

    async fn delete(&self, booking_id: Uuid, user_id: Uuid) -> Result<LedgerOutcome<()>, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let Some(booking) = lock_owned_booking(conn, booking_id, user_id).await? else {
                    return Ok(LedgerOutcome::NotFound);
                };
                if !booking.status.can_delete() {
                    return Ok(LedgerOutcome::Rejected(booking.status));
                }

                diesel::delete(bookings::table.find(booking.id))
                    .execute(conn)
                    .await?;

                Ok(LedgerOutcome::Applied(()))
            })
        })
        .await
    }

    async fn apply_payment(
        &self,
        event: PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                // A concurrent delivery of the same event waits on the primary key here.
                let claimed = diesel::insert_into(processed_payment_events::table)
                    .values(&ProcessedPaymentEvent {
                        event_id: event.event_id,
                        booking_id: event.booking_id,
                        status: event.status.as_str().to_string(),
                        processed_at: now,
                    })
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;
                if claimed == 0 {
                    return Ok(PaymentOutcome::Duplicate);
                }

                let updated = diesel::update(bookings::table.find(event.booking_id))
                    .set(&PaymentChangeset {
                        payment_status: event.status.as_str().to_string(),
                        payment_intent_id: event.payment_intent_id.clone(),
                        updated_at: now,
                    })
                    .execute(conn)
                    .await?;
                if updated == 0 {
                    diesel::delete(processed_payment_events::table.find(event.event_id))
                        .execute(conn)
                        .await?;
                    return Ok(PaymentOutcome::UnknownBooking);
                }

                Ok(PaymentOutcome::Applied {
                    booking_id: event.booking_id,
                    payment_status: event.status,
                })
            })
        })
        .await
    }

    async fn complete_elapsed(&self, before: NaiveDate, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;

        let elapsed_slots = slots::table
            .filter(slots::slot_date.lt(before))
            .select(slots::id);

        let completed = diesel::update(
            bookings::table
                .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
                .filter(bookings::slot_id.eq_any(elapsed_slots)),
        )
        .set((
            bookings::status.eq(BookingStatus::Completed.as_str()),
            bookings::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await?;

        Ok(completed)
    }
}
