//! duel-sync - round synchronization for two-player turn-based fights
//!
//! Each client runs its own [`game::MatchStateMachine`]. The two clients never
//! talk directly: they meet in one shared match document, and a
//! [`sync::SyncEngine`] per client pushes local selections into it and
//! resolves each round once both selections are visible there.

pub mod config;
pub mod game;
pub mod identity;
pub mod lifecycle;
pub mod practice;
pub mod store;
pub mod sync;
pub mod util;

pub use config::Config;
pub use game::{MatchOutcome, MatchSnapshot, SelectedMove};
pub use lifecycle::{LifecycleError, MatchLifecycle, Placement};
pub use store::{DocumentStore, InMemoryStore, SupabaseStore};
pub use sync::{MatchHandle, SyncError};
