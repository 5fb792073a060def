//! Read-path capacity rules for a single slot.
//!
//! Nothing here takes a lock. A passing check only says the slot looked
//! bookable when it was read; the conditional update in the store decides.

use chrono::NaiveDate;

use crate::{BookingError, Slot};

pub fn validate_party_size(participants: i32) -> Result<(), BookingError> {
    if participants <= 0 {
        return Err(BookingError::InvalidRequest(format!(
            "participants must be a positive integer, got {}",
            participants
        )));
    }
    Ok(())
}

/// Fails with `ConstraintViolation` when the slot counters are out of bounds.
pub fn check_integrity(slot: &Slot) -> Result<(), BookingError> {
    if slot.booked_participants < 0 || slot.booked_participants > slot.max_participants {
        return Err(BookingError::ConstraintViolation(format!(
            "slot {} has {} booked of {} participants",
            slot.id, slot.booked_participants, slot.max_participants
        )));
    }
    Ok(())
}

/// Decides whether `requested` participants fit into `slot` as of `today`.
///
/// A full slot reports `InsufficientCapacity { remaining: 0 }` so callers can
/// tell "sold out" apart from a slot that is closed or already in the past.
pub fn evaluate(slot: &Slot, requested: i32, today: NaiveDate) -> Result<(), BookingError> {
    validate_party_size(requested)?;
    check_integrity(slot)?;

    if slot.slot_date < today {
        return Err(BookingError::SlotUnavailable);
    }

    let remaining = slot.remaining();
    if remaining < requested {
        return Err(BookingError::InsufficientCapacity { remaining });
    }

    if !slot.is_available {
        return Err(BookingError::SlotUnavailable);
    }

    Ok(())
}
