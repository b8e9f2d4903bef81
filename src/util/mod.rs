//! Utility modules

pub mod rate_limit;
pub mod retry;
pub mod time;
