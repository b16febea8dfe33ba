//! Simulates three browser tabs sharing one reading session.
//!
//! Run with: cargo run -p tab-sim
//!
//! By default an in-memory server is used. Set `READING_SYNC_SERVER` (and
//! optionally `READING_SYNC_TOKEN`) to talk to a real backend instead.
//! Timing can be tuned with `READING_SYNC_CONFIG` (JSON) or the per-field
//! `READING_SYNC_LOCK_TTL_MS`, `READING_SYNC_HEARTBEAT_MS`,
//! `READING_SYNC_CHECK_MS` and `READING_SYNC_TICK_MS` variables.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use reading_sync_core::{
    BroadcastHub, Clock, EventBus, MemoryStorage, SessionApi, SharedStorage, SyncConfig, SystemClock,
    TabId,
};
use reading_sync_lock::ControllerLock;
use reading_sync_session::{MountedSession, ReadingSessionManager, api::MemorySessionApi};
use reading_sync_transport::{HttpSessionApi, StaticCredential};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BOOK_ID: i64 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match std::env::var("READING_SYNC_SERVER") {
        Ok(server) => {
            let token = std::env::var("READING_SYNC_TOKEN").unwrap_or_default();
            let api = HttpSessionApi::new(server.clone(), Arc::new(StaticCredential::basic(&token)))
                .context("building HTTP client")?;
            info!(%server, "using HTTP session server");
            simulate(Arc::new(api), clock, &config).await
        }
        Err(_) => {
            info!("using in-memory session server");
            let api = MemorySessionApi::new(Arc::clone(&clock));
            simulate(Arc::new(api), clock, &config).await
        }
    }
}

fn load_config() -> anyhow::Result<SyncConfig> {
    let mut config = match std::env::var("READING_SYNC_CONFIG") {
        Ok(raw) => SyncConfig::from_json_str(&raw).context("READING_SYNC_CONFIG")?,
        Err(_) => SyncConfig::default(),
    };

    for (var, field) in [
        ("READING_SYNC_LOCK_TTL_MS", &mut config.lock_ttl_ms),
        ("READING_SYNC_HEARTBEAT_MS", &mut config.heartbeat_interval_ms),
        ("READING_SYNC_CHECK_MS", &mut config.check_interval_ms),
        ("READING_SYNC_TICK_MS", &mut config.tick_interval_ms),
    ] {
        if let Ok(raw) = std::env::var(var) {
            *field = raw.parse().with_context(|| format!("{var}={raw}"))?;
        }
    }

    config.validate()?;
    Ok(config)
}

struct Tab<A: SessionApi> {
    name: &'static str,
    manager: Arc<ReadingSessionManager<A>>,
    mounted: Option<MountedSession>,
}

impl<A: SessionApi + 'static> Tab<A> {
    fn report(&self) {
        let lock = self.manager.lock_state();
        info!(
            tab = self.name,
            id = %self.manager.tab_id(),
            controller = lock.is_controller(),
            holder = ?lock.controller_id.as_ref().map(ToString::to_string),
            session = ?self.manager.active_session().map(|s| (s.id, s.status)),
            elapsed = %self.manager.formatted_time(),
            "tab state"
        );
    }

    /// Closing a tab stops its tasks; its lease is left to expire.
    fn close(&mut self) {
        if let Some(mounted) = self.mounted.take() {
            mounted.unmount();
        }
        info!(tab = self.name, "tab closed");
    }
}

async fn simulate<A>(api: Arc<A>, clock: Arc<dyn Clock>, config: &SyncConfig) -> anyhow::Result<()>
where
    A: SessionApi + 'static,
{
    let origin = Arc::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut tabs = Vec::new();
    for name in ["first", "second", "third"] {
        let id = TabId::generate();
        let storage: Arc<dyn SharedStorage> = Arc::new(origin.for_tab(id.clone()));
        let lock = Arc::new(ControllerLock::new(
            id.clone(),
            Arc::clone(&storage),
            Arc::clone(&clock),
            config,
        ));
        let bus = EventBus::new(id, &hub, Arc::clone(&storage), config);
        let manager = Arc::new(ReadingSessionManager::new(
            Arc::clone(&api),
            lock,
            bus,
            storage,
            Arc::clone(&clock),
            config,
        ));
        let mounted = manager.mount().await;
        tabs.push(Tab {
            name,
            manager,
            mounted: Some(mounted),
        });
    }
    let settle = config.check_interval() + Duration::from_millis(200);

    info!("first tab starts reading");
    anyhow::ensure!(tabs[0].manager.start_session(BOOK_ID).await, "start failed");
    tokio::time::sleep(settle * 2).await;
    report(&tabs[..]);

    info!("second tab tries to pause without control");
    let paused = tabs[1].manager.pause_session().await;
    info!(paused, "pause from non-controller");

    info!("second tab takes control and pauses");
    tabs[1].manager.take_control();
    tokio::time::sleep(settle).await;
    anyhow::ensure!(tabs[1].manager.pause_session().await, "pause failed");
    tokio::time::sleep(settle).await;
    report(&tabs[..]);
    if let Some(hint) = tabs[1].manager.pause_hint() {
        info!(frozen = %hint.frozen_time, paused_at = %hint.paused_at, "pause hint stored");
    }

    info!("second tab resumes");
    anyhow::ensure!(tabs[1].manager.resume_session().await, "resume failed");
    tokio::time::sleep(settle).await;

    info!("third tab excludes one second");
    tabs[2].manager.exclude_time(1_000).await;
    tokio::time::sleep(settle).await;
    report(&tabs[..]);

    info!("second tab closes; its lease lapses");
    tabs[1].close();
    tokio::time::sleep(config.lock_ttl() + settle).await;
    report(&tabs[..1]);
    report(&tabs[2..]);

    info!("third tab stops the session");
    anyhow::ensure!(tabs[2].manager.stop_session(None, Some(120)).await, "stop failed");
    tokio::time::sleep(settle).await;
    report(&tabs[..]);

    if let Some(history) = tabs[0].manager.sessions_for_book(BOOK_ID).await {
        info!(count = history.len(), "sessions recorded for book");
    }
    Ok(())
}

fn report<A: SessionApi + 'static>(tabs: &[Tab<A>]) {
    tabs.iter().for_each(Tab::report);
}
