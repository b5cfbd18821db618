mod error;
mod handlers;
mod logging;
mod models;
mod rate_limit;
mod router;
mod settings;
mod state;

use anyhow::Context;
use order_engine::venues::{Entropy, Pacing, SeededEntropy, SimulatedVenue, ThreadEntropy};
use persistence::{JournalStore, MemoryStore, OrderStore, StatusCache};
use rate_limit::RateLimiter;
use router::create_router;
use settings::Settings;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use types::clock::{now_nanos, secs_to_nanos};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    logging::init_logging(&settings.logging);

    info!("Starting order router gateway");

    // ── Storage ─────────────────────────────────────────────────────
    let cache = Arc::new(StatusCache::new());
    let journal = match settings.storage.journal_config() {
        Some(config) => {
            let dir = config.dir.clone();
            let store = Arc::new(
                JournalStore::open(config)
                    .with_context(|| format!("opening journal at {}", dir.display()))?,
            );
            let orders = store.all_orders().await;
            cache.rebuild(&orders);
            info!(dir = %dir.display(), orders = orders.len(), "Journal replayed");
            Some(store)
        }
        None => {
            warn!("No journal directory configured; orders are kept in memory only");
            None
        }
    };
    let store: Arc<dyn OrderStore> = match &journal {
        Some(store) => store.clone(),
        None => Arc::new(MemoryStore::new()),
    };

    // ── Engine ──────────────────────────────────────────────────────
    let entropy: Arc<dyn Entropy> = match settings.simulation.seed {
        Some(seed) => {
            info!(seed, "Using seeded venue simulation");
            Arc::new(SeededEntropy::new(seed))
        }
        None => Arc::new(ThreadEntropy),
    };
    let pacing = if settings.simulation.instant {
        Pacing::Instant
    } else {
        Pacing::Realtime
    };
    let venues = SimulatedVenue::pair(&settings.venues, entropy, pacing);

    let handle = order_engine::spawn(
        store,
        cache.clone(),
        venues,
        settings.engine.clone(),
        settings.runner.clone(),
    );
    let resumed = handle
        .engine
        .resume_incomplete()
        .await
        .context("resuming incomplete orders")?;
    if resumed > 0 {
        info!(count = resumed, "Re-queued incomplete orders");
    }

    // ── HTTP ────────────────────────────────────────────────────────
    let addr = settings.server.bind_addr()?;
    let shutdown_timeout = Duration::from_secs(settings.server.shutdown_timeout_secs);
    let state = AppState::new(handle.engine.clone(), handle.queue.clone(), settings);
    let housekeeping = tokio::spawn(housekeeping(
        cache,
        state.rate_limiter.clone(),
        state.settings.clone(),
    ));
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── Shutdown ────────────────────────────────────────────────────
    info!("Draining in-flight orders");
    if tokio::time::timeout(shutdown_timeout, handle.runner.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Runner did not drain in time; remaining orders resume on next start"
        );
    }
    housekeeping.abort();
    handle.engine.notifier().close();

    if let Some(journal) = journal {
        journal.sync().await.context("syncing journal")?;
    }

    info!("Gateway stopped");
    Ok(())
}

/// Periodically evict finished orders from the status cache and forget
/// idle rate-limit buckets.
async fn housekeeping(cache: Arc<StatusCache>, limiter: Arc<RateLimiter>, settings: Arc<Settings>) {
    let period = Duration::from_secs(settings.cache.sweep_interval_secs.max(1));
    let ttl = secs_to_nanos(settings.cache.terminal_ttl_secs as i64);
    let max_idle = Duration::from_secs(settings.rate_limit.idle_secs);

    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = cache.evict_terminal(now_nanos() - ttl);
        let buckets = limiter.sweep(max_idle);
        if evicted > 0 || buckets > 0 {
            debug!(evicted, buckets, "Housekeeping sweep");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
