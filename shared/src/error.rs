use thiserror::Error;

/// Everything a booking operation can report back to its caller.
///
/// Capacity, availability and duplicate outcomes are ordinary business
/// results. `TransientStore` is the only retryable variant and
/// `ConstraintViolation` means a persisted invariant is already broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("slot not found")]
    SlotNotFound,

    #[error("slot is not available for booking")]
    SlotUnavailable,

    #[error("only {remaining} spots left")]
    InsufficientCapacity { remaining: i32 },

    #[error("you already booked this slot")]
    DuplicateBooking,

    #[error("experience not found")]
    ExperienceNotFound,

    #[error("booking not found")]
    NotFound,

    #[error("booking is already cancelled")]
    AlreadyCancelled,

    #[error("booking is already completed")]
    AlreadyCompleted,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("store temporarily unavailable: {0}")]
    TransientStore(String),

    #[error("data integrity violation: {0}")]
    ConstraintViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::SlotNotFound => "slot_not_found",
            BookingError::SlotUnavailable => "slot_unavailable",
            BookingError::InsufficientCapacity { .. } => "insufficient_capacity",
            BookingError::DuplicateBooking => "duplicate_booking",
            BookingError::ExperienceNotFound => "experience_not_found",
            BookingError::NotFound => "not_found",
            BookingError::AlreadyCancelled => "already_cancelled",
            BookingError::AlreadyCompleted => "already_completed",
            BookingError::InvalidState(_) => "invalid_state",
            BookingError::InvalidRequest(_) => "invalid_request",
            BookingError::Unauthorized => "unauthorized",
            BookingError::TransientStore(_) => "transient_store_error",
            BookingError::ConstraintViolation(_) => "constraint_violation",
            BookingError::Internal(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::TransientStore(_))
    }

    pub fn must_be_cancelled_first() -> Self {
        BookingError::InvalidState("booking must be cancelled before it can be deleted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_reports_remaining_spots() {
        let err = BookingError::InsufficientCapacity { remaining: 2 };
        assert_eq!(err.to_string(), "only 2 spots left");
        assert_eq!(err.code(), "insufficient_capacity");
    }

    #[test]
    fn only_store_failures_are_retryable() {
        assert!(BookingError::TransientStore("timeout".into()).is_retryable());
        assert!(!BookingError::InsufficientCapacity { remaining: 0 }.is_retryable());
        assert!(!BookingError::DuplicateBooking.is_retryable());
        assert!(!BookingError::ConstraintViolation("x".into()).is_retryable());
    }
}
