use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    Booking, BookingDetails, BookingFilter, BookingStatus, ContactUpdate, Experience,
    PaymentEvent, PaymentOutcome, Slot, SlotIntegrity,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    released_count, BookingStore, ExperienceCatalog, LedgerOutcome, Reservation, ReserveOutcome,
    StoreError,
};

#[derive(Debug, Default)]
struct State {
    experiences: HashMap<Uuid, Experience>,
    slots: HashMap<Uuid, Slot>,
    bookings: HashMap<Uuid, Booking>,
    processed_payments: HashSet<Uuid>,
}

impl State {
    fn details(&self, booking: &Booking) -> Result<BookingDetails, StoreError> {
        let slot = self.slots.get(&booking.slot_id).ok_or_else(|| {
            StoreError::Integrity(format!("booking {} references a missing slot", booking.id))
        })?;
        let experience = self.experiences.get(&booking.experience_id).ok_or_else(|| {
            StoreError::Integrity(format!("booking {} references a missing experience", booking.id))
        })?;

        Ok(BookingDetails {
            booking: booking.clone(),
            slot: slot.summary(),
            experience: experience.clone(),
        })
    }

    fn owned(&self, booking_id: Uuid, user_id: Uuid) -> Option<&Booking> {
        self.bookings
            .get(&booking_id)
            .filter(|booking| booking.user_id == user_id)
    }
}

/// Failures to inject into upcoming store calls. Each counter is consumed
/// one call at a time.
#[derive(Debug, Default)]
pub struct FaultPlan {
    reserve_failures: AtomicU32,
    insert_failures: AtomicU32,
    lost_reserve_acks: AtomicU32,
    cancel_failures: AtomicU32,
    lost_cancel_acks: AtomicU32,
    payment_failures: AtomicU32,
}

impl FaultPlan {
    /// Fail the next `n` reservations before anything is written.
    pub fn fail_reserves(&self, n: u32) {
        self.reserve_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` booking inserts after the capacity update ran, so the
    /// whole reservation has to roll back.
    pub fn fail_inserts(&self, n: u32) {
        self.insert_failures.store(n, Ordering::SeqCst);
    }

    /// Commit the next `n` reservations but report a transient failure.
    pub fn lose_reserve_acks(&self, n: u32) {
        self.lost_reserve_acks.store(n, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self, n: u32) {
        self.cancel_failures.store(n, Ordering::SeqCst);
    }

    pub fn lose_cancel_acks(&self, n: u32) {
        self.lost_cancel_acks.store(n, Ordering::SeqCst);
    }

    pub fn fail_payments(&self, n: u32) {
        self.payment_failures.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Store kept in process memory behind a single async mutex.
///
/// Every trait method holds the lock for its whole body, which gives the same
/// all-or-nothing behaviour as a database transaction.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    faults: FaultPlan,
    reserve_calls: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Number of `reserve` calls that reached the store.
    pub fn reserve_calls(&self) -> u32 {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    pub async fn insert_experience(&self, experience: Experience) {
        self.state
            .lock()
            .await
            .experiences
            .insert(experience.id, experience);
    }

    /// Seeds or overwrites a slot row as-is.
    pub async fn insert_slot(&self, slot: Slot) {
        self.state.lock().await.slots.insert(slot.id, slot);
    }

    pub async fn bookings_for_slot(&self, slot_id: Uuid) -> Vec<Booking> {
        self.state
            .lock()
            .await
            .bookings
            .values()
            .filter(|booking| booking.slot_id == slot_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExperienceCatalog for InMemoryStore {
    async fn experience(&self, experience_id: Uuid) -> Result<Option<Experience>, StoreError> {
        Ok(self.state.lock().await.experiences.get(&experience_id).cloned())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.state.lock().await.slots.get(&slot_id).cloned())
    }

    async fn available_slots(
        &self,
        experience_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError> {
        let state = self.state.lock().await;
        let mut slots: Vec<Slot> = state
            .slots
            .values()
            .filter(|slot| {
                slot.experience_id == experience_id && slot.slot_date >= from && slot.is_available
            })
            .cloned()
            .collect();
        slots.sort_by_key(|slot| (slot.slot_date, slot.start_time));
        Ok(slots)
    }

    async fn slot_integrity(&self, slot_id: Uuid) -> Result<Option<SlotIntegrity>, StoreError> {
        let state = self.state.lock().await;
        let Some(slot) = state.slots.get(&slot_id) else {
            return Ok(None);
        };

        let active_participants = state
            .bookings
            .values()
            .filter(|booking| booking.slot_id == slot_id && booking.status != BookingStatus::Cancelled)
            .map(|booking| i64::from(booking.participants))
            .sum();

        Ok(Some(SlotIntegrity {
            slot: slot.clone(),
            active_participants,
        }))
    }

    async fn booking(&self, booking_id: Uuid) -> Result<Option<BookingDetails>, StoreError> {
        let state = self.state.lock().await;
        state
            .bookings
            .get(&booking_id)
            .map(|booking| state.details(booking))
            .transpose()
    }

    async fn user_bookings(
        &self,
        user_id: Uuid,
        filter: BookingFilter,
        today: NaiveDate,
    ) -> Result<Vec<BookingDetails>, StoreError> {
        let state = self.state.lock().await;
        let mut bookings = Vec::new();

        for booking in state.bookings.values().filter(|b| b.user_id == user_id) {
            if filter.status.is_some_and(|status| status != booking.status) {
                continue;
            }
            let details = state.details(booking)?;
            if filter.upcoming_only && details.slot.slot_date < today {
                continue;
            }
            bookings.push(details);
        }

        bookings.sort_by(|a, b| b.booking.created_at.cmp(&a.booking.created_at));
        Ok(bookings)
    }

    async fn has_active_booking(&self, user_id: Uuid, slot_id: Uuid) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.bookings.values().any(|booking| {
            booking.user_id == user_id
                && booking.slot_id == slot_id
                && booking.status != BookingStatus::Cancelled
        }))
    }

    async fn reserve(&self, reservation: Reservation) -> Result<ReserveOutcome, StoreError> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        if FaultPlan::take(&self.faults.reserve_failures) {
            return Err(StoreError::Transient("injected reserve failure".to_string()));
        }

        let mut state = self.state.lock().await;
        let booking = reservation.booking;
        let requested = booking.participants;

        let Some(slot) = state.slots.get(&booking.slot_id).cloned() else {
            return Ok(ReserveOutcome::Rejected(None));
        };

        let fits = slot.is_available
            && slot.slot_date >= reservation.today
            && slot.booked_participants + requested <= slot.max_participants;
        if !fits {
            return Ok(ReserveOutcome::Rejected(Some(slot)));
        }

        // Staged: nothing below touches `state` until every check has passed.
        let mut updated = slot;
        updated.booked_participants += requested;
        updated.is_available = updated.booked_participants < updated.max_participants;

        if FaultPlan::take(&self.faults.insert_failures) {
            return Err(StoreError::Transient("injected booking insert failure".to_string()));
        }
        if state.bookings.values().any(|existing| {
            existing.slot_id == booking.slot_id
                && existing.user_id == booking.user_id
                && existing.status != BookingStatus::Cancelled
        }) {
            return Err(StoreError::DuplicateActiveBooking);
        }
        if state
            .bookings
            .values()
            .any(|existing| existing.booking_reference == booking.booking_reference)
        {
            return Err(StoreError::ReferenceTaken);
        }
        if state.bookings.contains_key(&booking.id) {
            return Err(StoreError::Integrity(format!("booking id {} already exists", booking.id)));
        }

        state.slots.insert(updated.id, updated.clone());
        state.bookings.insert(booking.id, booking.clone());
        drop(state);

        if FaultPlan::take(&self.faults.lost_reserve_acks) {
            return Err(StoreError::Transient("injected lost acknowledgement".to_string()));
        }

        Ok(ReserveOutcome::Reserved {
            booking,
            slot: updated,
        })
    }

    async fn cancel(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerOutcome<BookingDetails>, StoreError> {
        if FaultPlan::take(&self.faults.cancel_failures) {
            return Err(StoreError::Transient("injected cancel failure".to_string()));
        }

        let mut state = self.state.lock().await;
        let Some(booking) = state.owned(booking_id, user_id).cloned() else {
            return Ok(LedgerOutcome::NotFound);
        };
        if !booking.status.can_cancel() {
            return Ok(LedgerOutcome::Rejected(booking.status));
        }

        let mut slot = state.slots.get(&booking.slot_id).cloned().ok_or_else(|| {
            StoreError::Integrity(format!("booking {} references a missing slot", booking.id))
        })?;
        slot.booked_participants = released_count(slot.id, slot.booked_participants, booking.participants);
        slot.is_available = true;

        let mut cancelled = booking;
        cancelled.status = BookingStatus::Cancelled;
        cancelled.cancelled_at = Some(now);
        cancelled.updated_at = now;

        state.slots.insert(slot.id, slot);
        state.bookings.insert(cancelled.id, cancelled.clone());
        let details = state.details(&cancelled)?;
        drop(state);

        if FaultPlan::take(&self.faults.lost_cancel_acks) {
            return Err(StoreError::Transient("injected lost acknowledgement".to_string()));
        }

        Ok(LedgerOutcome::Applied(details))
    }

    async fn update_contact(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        update: ContactUpdate,
        now: DateTime<Utc>,
    ) -> Result<LedgerOutcome<BookingDetails>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(mut booking) = state.owned(booking_id, user_id).cloned() else {
            return Ok(LedgerOutcome::NotFound);
        };
        if !booking.status.accepts_contact_update() {
            return Ok(LedgerOutcome::Rejected(booking.status));
        }

        booking.contact.apply(&update);
        booking.updated_at = now;
        let details = state.details(&booking)?;
        state.bookings.insert(booking.id, booking);

        Ok(LedgerOutcome::Applied(details))
    }

    async fn delete(&self, booking_id: Uuid, user_id: Uuid) -> Result<LedgerOutcome<()>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(status) = state.owned(booking_id, user_id).map(|booking| booking.status) else {
            return Ok(LedgerOutcome::NotFound);
        };
        if !status.can_delete() {
            return Ok(LedgerOutcome::Rejected(status));
        }

        state.bookings.remove(&booking_id);
        Ok(LedgerOutcome::Applied(()))
    }

    async fn apply_payment(
        &self,
        event: PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if FaultPlan::take(&self.faults.payment_failures) {
            return Err(StoreError::Transient("injected payment failure".to_string()));
        }
        if state.processed_payments.contains(&event.event_id) {
            return Ok(PaymentOutcome::Duplicate);
        }

        let Some(booking) = state.bookings.get_mut(&event.booking_id) else {
            return Ok(PaymentOutcome::UnknownBooking);
        };
        booking.payment_status = event.status;
        if let Some(intent) = event.payment_intent_id {
            booking.payment_intent_id = Some(intent);
        }
        booking.updated_at = now;
        state.processed_payments.insert(event.event_id);

        Ok(PaymentOutcome::Applied {
            booking_id: event.booking_id,
            payment_status: event.status,
        })
    }

    async fn complete_elapsed(&self, before: NaiveDate, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let elapsed: HashSet<Uuid> = state
            .slots
            .values()
            .filter(|slot| slot.slot_date < before)
            .map(|slot| slot.id)
            .collect();

        let mut completed = 0;
        for booking in state.bookings.values_mut() {
            if booking.status == BookingStatus::Confirmed && elapsed.contains(&booking.slot_id) {
                booking.status = BookingStatus::Completed;
                booking.updated_at = now;
                completed += 1;
            }
        }

        Ok(completed)
    }
}
