#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use booking_service::clock::Clock;
use booking_service::coordinator::{BookingCoordinator, CoordinatorConfig, CreateBooking};
use booking_service::notifications::NotificationSink;
use booking_service::store::InMemoryStore;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use shared::{BookingEvent, ContactInfo, Experience, Slot};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.now.lock().unwrap();
        *now = *now + ChronoDuration::days(days);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BookingEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<BookingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, event: &BookingEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("broker unreachable");
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<FixedClock>,
    pub coordinator: Arc<BookingCoordinator>,
    pub experience: Experience,
}

pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    start_of_day().date_naive()
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        store_timeout: Duration::from_secs(1),
        max_transient_retries: 3,
        retry_backoff: Duration::from_millis(1),
        max_reference_attempts: 5,
        notification_timeout: Duration::from_millis(200),
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: CoordinatorConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock::at(start_of_day()));

        let experience = Experience {
            id: Uuid::new_v4(),
            title: "Sunrise kayak tour".to_string(),
            price: BigDecimal::from_str("49.50").unwrap(),
            currency: "EUR".to_string(),
        };
        store.insert_experience(experience.clone()).await;

        let coordinator = Arc::new(
            BookingCoordinator::new(store.clone(), store.clone(), sink.clone(), config)
                .with_clock(clock.clone()),
        );

        Self {
            store,
            sink,
            clock,
            coordinator,
            experience,
        }
    }

    /// Seeds a slot `days_ahead` days from today with the given counters.
    pub async fn slot(&self, days_ahead: i64, max: i32, booked: i32) -> Slot {
        let slot = Slot {
            id: Uuid::new_v4(),
            experience_id: self.experience.id,
            slot_date: today() + ChronoDuration::days(days_ahead),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            max_participants: max,
            booked_participants: booked,
            is_available: booked < max,
        };
        self.store.insert_slot(slot.clone()).await;
        slot
    }

    pub async fn current(&self, slot_id: Uuid) -> Slot {
        use booking_service::store::BookingStore;
        self.store.slot(slot_id).await.unwrap().unwrap()
    }

    pub fn request(&self, user_id: Uuid, slot: &Slot, participants: i32) -> CreateBooking {
        CreateBooking {
            user_id,
            experience_id: self.experience.id,
            slot_id: slot.id,
            participants,
            contact: contact(),
        }
    }
}

pub fn contact() -> ContactInfo {
    ContactInfo {
        customer_name: "Grace Hopper".to_string(),
        customer_email: "grace@example.com".to_string(),
        customer_phone: Some("+44 20 7946 0000".to_string()),
        special_requests: None,
    }
}
