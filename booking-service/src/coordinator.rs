//! Booking transaction coordinator.
//!
//! Requests flow availability check → duplicate guard → atomic reservation.
//! The pre-checks only produce friendly errors early; the store's conditional
//! update is what actually decides who gets the last spots.

use chrono::{DateTime, NaiveDate, Utc};
use num_traits::Signed;
use shared::availability::{self, validate_party_size};
use shared::reference::generate_booking_reference;
use shared::{
    total_amount, Booking, BookingDetails, BookingError, BookingEvent, BookingEventKind,
    BookingFilter, BookingStatus, ContactInfo, ContactUpdate, PaymentEvent, PaymentOutcome,
    PaymentStatus, Slot, SlotIntegrity,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::notifications::NotificationSink;
use crate::store::{
    BookingStore, ExperienceCatalog, LedgerOutcome, Reservation, ReserveOutcome, StoreError,
};

pub type ReferenceGenerator = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
    /// Retries after a transient failure of a capacity-changing write.
    pub max_transient_retries: u32,
    /// Base delay, doubled on every retry.
    pub retry_backoff: Duration,
    pub max_reference_attempts: u32,
    pub notification_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            max_transient_retries: 3,
            retry_backoff: Duration::from_millis(50),
            max_reference_attempts: 5,
            notification_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub user_id: Uuid,
    pub experience_id: Uuid,
    pub slot_id: Uuid,
    pub participants: i32,
    pub contact: ContactInfo,
}

pub struct BookingCoordinator {
    store: Arc<dyn BookingStore>,
    catalog: Arc<dyn ExperienceCatalog>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    references: ReferenceGenerator,
    config: CoordinatorConfig,
}

impl BookingCoordinator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        catalog: Arc<dyn ExperienceCatalog>,
        notifier: Arc<dyn NotificationSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
            clock: Arc::new(SystemClock),
            references: Arc::new(generate_booking_reference),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reference_generator(mut self, references: ReferenceGenerator) -> Self {
        self.references = references;
        self
    }

    pub async fn check_availability(&self, slot_id: Uuid, participants: i32) -> Result<Slot, BookingError> {
        validate_party_size(participants)?;

        let slot = self
            .call("slot", self.store.slot(slot_id))
            .await?
            .ok_or(BookingError::SlotNotFound)?;
        self.evaluate(&slot, participants)?;

        Ok(slot)
    }

    /// Bookable slots of an experience from `from` (default: today) onwards.
    pub async fn available_slots(
        &self,
        experience_id: Uuid,
        from: Option<NaiveDate>,
    ) -> Result<Vec<Slot>, BookingError> {
        self.call("experience", self.catalog.experience(experience_id))
            .await?
            .ok_or(BookingError::ExperienceNotFound)?;

        let today = self.clock.today();
        let from = from.map_or(today, |date| date.max(today));
        let slots = self
            .call("available_slots", self.store.available_slots(experience_id, from))
            .await?;

        Ok(slots)
    }

    /// Duplicate guard: does `user_id` already hold a live booking on `slot_id`?
    pub async fn has_active_booking(&self, user_id: Uuid, slot_id: Uuid) -> Result<bool, BookingError> {
        Ok(self
            .call("has_active_booking", self.store.has_active_booking(user_id, slot_id))
            .await?)
    }

    pub async fn create_booking(&self, request: CreateBooking) -> Result<BookingDetails, BookingError> {
        validate_party_size(request.participants)?;
        request.contact.validate()?;

        let experience = self
            .call("experience", self.catalog.experience(request.experience_id))
            .await?
            .ok_or(BookingError::ExperienceNotFound)?;
        if experience.price.is_negative() {
            error!(experience_id = %experience.id, "Experience has a negative price");
            return Err(BookingError::ConstraintViolation(format!(
                "experience {} has a negative price",
                experience.id
            )));
        }

        let slot = self
            .check_availability(request.slot_id, request.participants)
            .await?;
        if slot.experience_id != experience.id {
            return Err(BookingError::SlotNotFound);
        }

        if self.has_active_booking(request.user_id, slot.id).await? {
            return Err(BookingError::DuplicateBooking);
        }

        let now = self.clock.now();
        let booking = Booking {
            id: Uuid::new_v4(),
            booking_reference: (self.references)(now),
            user_id: request.user_id,
            experience_id: experience.id,
            slot_id: slot.id,
            participants: request.participants,
            total_amount: total_amount(&experience.price, request.participants),
            currency: experience.currency.clone(),
            contact: request.contact,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: None,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        };

        let (booking, slot) = self.reserve(booking).await?;
        info!(
            booking_id = %booking.id,
            slot_id = %slot.id,
            user_id = %booking.user_id,
            participants = booking.participants,
            remaining = slot.remaining(),
            "Booking {} confirmed",
            booking.booking_reference
        );

        let details = BookingDetails {
            booking,
            slot: slot.summary(),
            experience,
        };
        self.notify(BookingEvent::new(BookingEventKind::Confirmed, details.clone()))
            .await;

        Ok(details)
    }

    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<Option<BookingDetails>, BookingError> {
        let details = self.call("booking", self.store.booking(booking_id)).await?;
        Ok(details.filter(|details| user_id.map_or(true, |user| details.booking.user_id == user)))
    }

    pub async fn list_user_bookings(
        &self,
        user_id: Uuid,
        filter: BookingFilter,
    ) -> Result<Vec<BookingDetails>, BookingError> {
        let today = self.clock.today();
        Ok(self
            .call("user_bookings", self.store.user_bookings(user_id, filter, today))
            .await?)
    }

    pub async fn update_booking_contact(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        update: ContactUpdate,
    ) -> Result<BookingDetails, BookingError> {
        update.validate()?;

        let outcome = self
            .call(
                "update_contact",
                self.store.update_contact(booking_id, user_id, update, self.clock.now()),
            )
            .await?;

        match outcome {
            LedgerOutcome::Applied(details) => {
                debug!(booking_id = %booking_id, "Contact details updated");
                Ok(details)
            }
            LedgerOutcome::NotFound => Err(BookingError::NotFound),
            LedgerOutcome::Rejected(status) => Err(BookingError::InvalidState(format!(
                "cannot update contact details of a {} booking",
                status
            ))),
        }
    }

    pub async fn cancel_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<BookingDetails, BookingError> {
        let mut retries = 0;

        let details = loop {
            let outcome = self
                .call("cancel", self.store.cancel(booking_id, user_id, self.clock.now()))
                .await;

            match outcome {
                Ok(LedgerOutcome::Applied(details)) => break details,
                Ok(LedgerOutcome::NotFound) => return Err(BookingError::NotFound),
                Ok(LedgerOutcome::Rejected(BookingStatus::Cancelled)) if retries > 0 => {
                    // An earlier attempt committed but its acknowledgement was lost.
                    info!(booking_id = %booking_id, "Cancellation had already committed");
                    break self
                        .call("booking", self.store.booking(booking_id))
                        .await?
                        .ok_or(BookingError::NotFound)?;
                }
                Ok(LedgerOutcome::Rejected(status)) => return Err(status.cancellation_error()),
                Err(err) if err.is_transient() && retries < self.config.max_transient_retries => {
                    retries += 1;
                    warn!(booking_id = %booking_id, attempt = retries, error = %err, "Retrying cancellation");
                    self.backoff(retries).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        info!(
            booking_id = %details.booking.id,
            slot_id = %details.booking.slot_id,
            participants = details.booking.participants,
            "Booking {} cancelled",
            details.booking.booking_reference
        );
        self.notify(BookingEvent::new(BookingEventKind::Cancelled, details.clone()))
            .await;

        Ok(details)
    }

    pub async fn delete_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<(), BookingError> {
        match self.call("delete", self.store.delete(booking_id, user_id)).await? {
            LedgerOutcome::Applied(()) => {
                info!(booking_id = %booking_id, "Booking deleted");
                Ok(())
            }
            LedgerOutcome::NotFound => Err(BookingError::NotFound),
            LedgerOutcome::Rejected(_) => Err(BookingError::must_be_cancelled_first()),
        }
    }

    /// Checks the slot counters against the bookings that hold them.
    pub async fn verify_slot(&self, slot_id: Uuid) -> Result<SlotIntegrity, BookingError> {
        let integrity = self
            .call("slot_integrity", self.store.slot_integrity(slot_id))
            .await?
            .ok_or(BookingError::SlotNotFound)?;

        if let Err(err) = integrity.verify() {
            error!(slot_id = %slot_id, error = %err, "Slot integrity check failed");
            return Err(err);
        }

        Ok(integrity)
    }

    pub async fn apply_payment_event(&self, event: PaymentEvent) -> Result<PaymentOutcome, BookingError> {
        let now = self.clock.now();
        let outcome = self
            .retry_transient("apply_payment", || self.store.apply_payment(event.clone(), now))
            .await?;

        match &outcome {
            PaymentOutcome::Applied { booking_id, payment_status } => {
                info!(booking_id = %booking_id, "Payment status set to {}", payment_status)
            }
            PaymentOutcome::Duplicate => debug!("Payment event {} already applied", event.event_id),
            PaymentOutcome::UnknownBooking => {
                warn!("Payment event {} references unknown booking {}", event.event_id, event.booking_id)
            }
        }

        Ok(outcome)
    }

    /// Moves confirmed bookings whose slot date has passed to completed.
    pub async fn complete_elapsed_bookings(&self) -> Result<usize, BookingError> {
        let today = self.clock.today();
        let now = self.clock.now();
        Ok(self
            .retry_transient("complete_elapsed", || self.store.complete_elapsed(today, now))
            .await?)
    }

    async fn reserve(&self, mut booking: Booking) -> Result<(Booking, Slot), BookingError> {
        let mut retries = 0;
        let mut reference_attempts = 1;

        loop {
            match self.attempt_reserve(&booking, retries > 0).await {
                Ok(ReserveOutcome::Reserved { booking, slot }) => return Ok((booking, slot)),
                Ok(ReserveOutcome::Rejected(current)) => {
                    let slot = current.ok_or(BookingError::SlotNotFound)?;
                    self.evaluate(&slot, booking.participants)?;

                    // Capacity was freed between the conditional update and the re-read.
                    if retries >= self.config.max_transient_retries {
                        return Err(BookingError::TransientStore(format!(
                            "slot {} is under heavy contention",
                            slot.id
                        )));
                    }
                    retries += 1;
                }
                Err(StoreError::ReferenceTaken)
                    if reference_attempts < self.config.max_reference_attempts =>
                {
                    if retries > 0 {
                        if let Some(reserved) = self.committed(&booking).await? {
                            return Ok(reserved);
                        }
                    }
                    reference_attempts += 1;
                    warn!(
                        booking_id = %booking.id,
                        "Booking reference {} collided, generating another",
                        booking.booking_reference
                    );
                    booking.booking_reference = (self.references)(self.clock.now());
                }
                Err(err @ (StoreError::DuplicateActiveBooking | StoreError::Integrity(_)))
                    if retries > 0 =>
                {
                    // An earlier attempt may have committed after the pre-retry lookup ran.
                    return match self.committed(&booking).await? {
                        Some(reserved) => Ok(reserved),
                        None => Err(err.into()),
                    };
                }
                Err(err) if err.is_transient() && retries < self.config.max_transient_retries => {
                    retries += 1;
                    warn!(
                        booking_id = %booking.id,
                        slot_id = %booking.slot_id,
                        attempt = retries,
                        error = %err,
                        "Retrying reservation"
                    );
                    self.backoff(retries).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn attempt_reserve(&self, booking: &Booking, recheck: bool) -> Result<ReserveOutcome, StoreError> {
        // The booking id is fixed across retries, so a commit whose
        // acknowledgement was lost shows up here instead of being repeated.
        if recheck {
            if let Some((booking, slot)) = self.committed(booking).await? {
                return Ok(ReserveOutcome::Reserved { booking, slot });
            }
        }

        let reservation = Reservation {
            booking: booking.clone(),
            today: self.clock.today(),
        };
        self.call("reserve", self.store.reserve(reservation)).await
    }

    /// Looks up a booking this coordinator already tried to reserve.
    async fn committed(&self, booking: &Booking) -> Result<Option<(Booking, Slot)>, StoreError> {
        let Some(existing) = self.call("booking", self.store.booking(booking.id)).await? else {
            return Ok(None);
        };
        if existing.booking.user_id != booking.user_id || existing.booking.slot_id != booking.slot_id {
            return Ok(None);
        }

        info!(booking_id = %booking.id, "Reservation had already committed");
        let slot = self
            .call("slot", self.store.slot(booking.slot_id))
            .await?
            .ok_or_else(|| {
                StoreError::Integrity(format!("booking {} references a missing slot", booking.id))
            })?;

        Ok(Some((existing.booking, slot)))
    }

    fn evaluate(&self, slot: &Slot, participants: i32) -> Result<(), BookingError> {
        availability::evaluate(slot, participants, self.clock.today()).map_err(|err| {
            if let BookingError::ConstraintViolation(detail) = &err {
                error!(slot_id = %slot.id, "Slot counters out of bounds: {}", detail);
            }
            err
        })
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(op)),
        }
    }

    async fn retry_transient<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries = 0;
        loop {
            match self.call(op, f()).await {
                Err(err) if err.is_transient() && retries < self.config.max_transient_retries => {
                    retries += 1;
                    warn!(attempt = retries, error = %err, "Retrying {}", op);
                    self.backoff(retries).await;
                }
                other => return other,
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let factor = 1u32 << attempt.min(10);
        sleep(self.config.retry_backoff.saturating_mul(factor)).await;
    }

    async fn notify(&self, event: BookingEvent) {
        let booking_id = event.booking.booking.id;
        match timeout(self.config.notification_timeout, self.notifier.publish(&event)).await {
            Ok(Ok(())) => debug!(booking_id = %booking_id, "Published {:?} notification", event.kind),
            Ok(Err(e)) => warn!(booking_id = %booking_id, "Failed to publish booking notification: {}", e),
            Err(_) => warn!(booking_id = %booking_id, "Timed out publishing booking notification"),
        }
    }
}
