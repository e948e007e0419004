use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use effect_db::EffectDb;
use effects::{LogSink, NotificationSink, SpellCatalog};
use persistence::{EffectStore, FileEffectStore, MemoryEffectStore, PersistenceBridge};
use scheduler::RegionLoop;

use project_region::config::{parse_cli_args, ServerConfig, StoreBackend};
use project_region::session::SessionManager;
use project_region::shutdown::{self, shutdown_channel, ShutdownCause, ShutdownRx, ShutdownTx};
use project_region::simulation::{run_request_task, run_session_churn, RegionWorld};

#[tokio::main]
async fn main() {
    observability::init_logging();

    let config = parse_cli_args();
    tracing::info!(region = %config.region, "Region server starting...");

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        signal_tx.trigger(shutdown::wait_for_signal().await);
    });

    run_region_server(config, shutdown_tx, shutdown_rx.clone()).await;

    match shutdown_rx.cause() {
        Some(cause) => tracing::info!(%cause, "Server stopped."),
        None => tracing::info!("Server stopped."),
    }
}

fn open_store(config: &ServerConfig) -> Result<Arc<dyn EffectStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn EffectStore> = match config.database.backend {
        StoreBackend::Sqlite => Arc::new(EffectDb::open(&config.database.path)?),
        StoreBackend::File => {
            tracing::info!(dir = %config.database.effects_dir, "using file effect store");
            Arc::new(FileEffectStore::new(&config.database.effects_dir))
        }
        StoreBackend::Memory => {
            tracing::warn!("using volatile memory effect store, effects are lost on restart");
            Arc::new(MemoryEffectStore::new())
        }
    };
    Ok(store)
}

async fn run_region_server(config: ServerConfig, shutdown_tx: ShutdownTx, shutdown_rx: ShutdownRx) {
    let catalog = match SpellCatalog::load_dir(Path::new(&config.content.spells_dir)) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            tracing::error!("Failed to load spells: {}", e);
            return;
        }
    };
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open effect store: {}", e);
            return;
        }
    };

    let mut region_loop = RegionLoop::new(config.to_scheduler_config(), config.region.clone());
    let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);
    let bridge = PersistenceBridge::new(store, catalog.clone(), &config.effects);
    let sessions = Arc::new(SessionManager::new(
        bridge,
        region_loop.scheduler.clone(),
        config.effects.clone(),
        sink.clone(),
    ));
    let world = Arc::new(RegionWorld::new(
        catalog,
        sessions.clone(),
        config.simulation.npcs,
        &config.effects,
        sink,
    ));

    for i in 0..config.simulation.players {
        let name = format!("player{i}");
        if let Err(e) = sessions.login(&name) {
            tracing::warn!(player = %name, "login failed: {}", e);
        }
    }

    // Region thread: the only place timers fire
    let tick_shutdown = shutdown_rx.clone();
    let tick_handle = std::thread::spawn(move || {
        let ticks = region_loop.run_until(|_| tick_shutdown.is_shutdown());
        tracing::info!(ticks, "region tick loop stopped");
        // stopped by max_ticks: take the request tasks down with it
        shutdown_tx.trigger(ShutdownCause::TickLimit { ticks });
    });

    let sim = &config.simulation;
    let mut tasks = Vec::new();
    for t in 0..sim.request_tasks {
        tasks.push(tokio::spawn(run_request_task(
            world.clone(),
            sim.seed.wrapping_add(t as u64),
            sim.actions_per_second,
            shutdown_rx.clone(),
        )));
    }
    let churn = tokio::spawn(run_session_churn(
        world.clone(),
        sim.seed.rotate_left(17),
        Duration::from_secs(sim.session_churn_secs.max(1)),
        shutdown_rx.clone(),
    ));

    tracing::info!(
        players = sessions.online_count(),
        npcs = world.npcs().len(),
        tasks = tasks.len(),
        "region running"
    );

    let mut landed = 0;
    for task in tasks {
        match task.await {
            Ok(n) => landed += n,
            Err(e) => tracing::error!("request task failed: {}", e),
        }
    }
    if let Err(e) = churn.await {
        tracing::error!("session churn task failed: {}", e);
    }
    if tick_handle.join().is_err() {
        tracing::error!("region tick thread panicked");
    }

    let saved = sessions.logout_all();
    tracing::info!(landed, saved, "effects saved at shutdown");
}
