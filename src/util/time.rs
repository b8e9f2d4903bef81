//! Round timing helpers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Default length of a round's selection window
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadlines for the round currently being played
#[derive(Debug, Clone, Copy)]
pub struct RoundClock {
    /// Local player's selection window closes
    pub local: Instant,
    /// Opponent is treated as absent for the round
    pub opponent: Instant,
}

impl RoundClock {
    /// Start a round's clock at `opened`
    pub fn start(opened: Instant, round_timeout: Duration, opponent_grace: Duration) -> Self {
        let local = opened + round_timeout;
        Self {
            local,
            opponent: local + opponent_grace,
        }
    }
}

/// Get current Unix timestamp in seconds
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
