//! Practice duel runner
//!
//! Plays one full match between two simulated clients over the configured
//! store. Each client gets its own lifecycle, identity and sync engine, so the
//! run goes through the same document protocol two devices would use.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duel_sync::config::Config;
use duel_sync::game::CharacterType;
use duel_sync::identity::{self, IdentityProvider, StaticIdentity};
use duel_sync::lifecycle::LifecycleError;
use duel_sync::practice::PracticeFighter;
use duel_sync::store::{DocumentStore, InMemoryStore, MatchKey, SupabaseClient, SupabaseStore};
use duel_sync::{MatchHandle, MatchLifecycle, Placement};

/// Pause before each simulated pick
const THINK_TIME: Duration = Duration::from_millis(300);
/// Attempts the challenger makes while the host is still opening the match
const JOIN_ATTEMPTS: u32 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    info!("Starting practice duel");

    match &config.store.supabase {
        Some(supabase) => {
            info!(url = %supabase.url, "Using Supabase store");
            let client = SupabaseClient::new(supabase, &config.store)?;
            let store = SupabaseStore::new(client, config.sync.poll_interval);
            run_duel(Arc::new(store), &config).await
        }
        None => {
            info!("Using in-memory store");
            run_duel(Arc::new(InMemoryStore::new()), &config).await
        }
    }
}

async fn run_duel<S: DocumentStore>(store: Arc<S>, config: &Config) -> anyhow::Result<()> {
    let host_identity: Arc<dyn IdentityProvider> = Arc::from(identity::from_config(&config.identity)?);
    let key = MatchKey::from(&host_identity.current_player_id()?);

    let lifecycle = |identity: Arc<dyn IdentityProvider>| {
        MatchLifecycle::new(
            store.clone(),
            identity,
            config.rules.clone(),
            config.sync.clone(),
            config.lifecycle.clone(),
        )
    };
    let host = lifecycle(host_identity);
    let challenger = lifecycle(Arc::new(StaticIdentity::random()));

    let (host_handle, challenger_handle) = tokio::try_join!(
        host.create_match(CharacterType::Samuel, Placement::Host),
        join_when_open(&challenger, key.clone(), config.sync.poll_interval),
    )?;

    info!(match_key = %key, "Both fighters in, duel starting");

    let seed = config.practice_seed;
    let duel = async {
        tokio::join!(
            PracticeFighter::new(seed).play(&host_handle, THINK_TIME),
            PracticeFighter::new(seed.map(|s| s.wrapping_add(1))).play(&challenger_handle, THINK_TIME),
        )
    };

    tokio::select! {
        (host_outcome, challenger_outcome) = duel => {
            report(&host_handle);
            info!(?host_outcome, ?challenger_outcome, "Duel finished");
        }
        _ = shutdown_signal() => {
            info!("Duel interrupted");
        }
    }

    challenger.terminate(challenger_handle).await?;
    host.terminate(host_handle).await?;

    info!("Practice duel complete");
    Ok(())
}

/// Join `key`, waiting for the host to open it
async fn join_when_open<S: DocumentStore>(
    lifecycle: &MatchLifecycle<S>,
    key: MatchKey,
    poll_interval: Duration,
) -> Result<MatchHandle, LifecycleError> {
    let mut attempt = 1;
    loop {
        match lifecycle
            .create_match(CharacterType::Clara, Placement::Join(key.clone()))
            .await
        {
            Err(LifecycleError::MatchNotFound(_)) if attempt < JOIN_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(poll_interval).await;
            }
            result => return result,
        }
    }
}

fn report(handle: &MatchHandle) {
    let state = handle.current_state();
    info!(
        rounds = state.player.rounds_played,
        host_health = state.player.health,
        challenger_health = state.opponent.health,
        "Final standings"
    );
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received terminate signal, stopping");
        }
    }
}
