mod common;

use common::Harness;
use proptest::prelude::*;
use shared::*;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Step {
    Create { user: usize, participants: i32 },
    Cancel { user: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0usize..5, 1i32..5).prop_map(|(user, participants)| Step::Create { user, participants }),
        1 => (0usize..5).prop_map(|user| Step::Cancel { user }),
    ]
}

async fn run_steps(max: i32, steps: Vec<Step>) -> Result<(), TestCaseError> {
    let h = Harness::new().await;
    let slot = h.slot(3, max, 0).await;
    let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let mut active: HashMap<usize, (Uuid, i32)> = HashMap::new();

    for step in steps {
        match step {
            Step::Create { user, participants } => {
                match h.coordinator.create_booking(h.request(users[user], &slot, participants)).await {
                    Ok(details) => {
                        prop_assert!(!active.contains_key(&user));
                        active.insert(user, (details.booking.id, participants));
                    }
                    Err(BookingError::DuplicateBooking) => {
                        prop_assert!(active.contains_key(&user));
                    }
                    Err(BookingError::InsufficientCapacity { remaining }) => {
                        prop_assert!(remaining < participants);
                    }
                    Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
                }
            }
            Step::Cancel { user } => {
                if let Some((booking_id, _)) = active.remove(&user) {
                    let cancelled = h.coordinator.cancel_booking(booking_id, users[user]).await;
                    prop_assert!(cancelled.is_ok());
                }
            }
        }

        let integrity = h.coordinator.verify_slot(slot.id).await;
        prop_assert!(integrity.is_ok());
        let current = h.current(slot.id).await;
        let held: i32 = active.values().map(|(_, participants)| participants).sum();
        prop_assert!(current.booked_participants <= current.max_participants);
        prop_assert_eq!(current.booked_participants, held);
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn counters_follow_creates_and_cancels(max in 1i32..9, steps in prop::collection::vec(step(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_steps(max, steps))?;
    }
}
