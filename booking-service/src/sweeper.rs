use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::coordinator::BookingCoordinator;

/// Periodically completes confirmed bookings whose slot date has passed.
pub struct CompletionSweeper {
    coordinator: Arc<BookingCoordinator>,
    period: Duration,
}

impl CompletionSweeper {
    pub fn new(coordinator: Arc<BookingCoordinator>, period: Duration) -> Self {
        Self { coordinator, period }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.period);

        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    pub async fn sweep(&self) -> usize {
        match self.coordinator.complete_elapsed_bookings().await {
            Ok(0) => 0,
            Ok(count) => {
                info!("Marked {} elapsed bookings as completed", count);
                count
            }
            Err(e) => {
                error!("Error completing elapsed bookings: {}", e);
                0
            }
        }
    }
}
