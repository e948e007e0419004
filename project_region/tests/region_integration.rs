/// Integration test: region ticking on its own thread while request threads
/// apply and cancel effects, then a session boundary through SQLite.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use effect_db::EffectDb;
use effects::{
    apply_effect, EffectConfig, EffectState, Living, LogSink, NotificationSink, SpellCatalog, SpellId,
};
use persistence::{EffectStore, PersistenceBridge};
use project_region::session::SessionManager;
use project_region::shutdown::{shutdown_channel, ShutdownCause};
use project_region::simulation::{run_request_task, RegionWorld, Rng};
use scheduler::{RegionLoop, SchedulerConfig};

fn content_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/content"))
}

fn setup(region_loop: &RegionLoop, db: Arc<EffectDb>) -> Arc<RegionWorld<Arc<EffectDb>>> {
    let catalog = Arc::new(SpellCatalog::load_dir(content_dir()).unwrap());
    let config = EffectConfig::strict();
    let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);
    let bridge = PersistenceBridge::new(db, catalog.clone(), &config);
    let sessions = Arc::new(SessionManager::new(
        bridge,
        region_loop.scheduler.clone(),
        config.clone(),
        sink.clone(),
    ));
    Arc::new(RegionWorld::new(catalog, sessions, 6, &config, sink))
}

fn assert_list_invariants(living: &dyn Living) {
    let effects = living.effects().snapshot();
    let ids: HashSet<_> = effects.iter().map(|e| e.id()).collect();
    assert_eq!(ids.len(), effects.len(), "duplicate ids on {}", living.name());

    let mut groups = HashSet::new();
    for effect in &effects {
        if effect.state() != EffectState::ActiveEnabled {
            continue;
        }
        if let Some(group) = effect.profile().group {
            assert!(groups.insert(group), "two enabled effects of {group:?} on {}", living.name());
        }
    }
}

#[test]
fn content_directory_loads() {
    let catalog = SpellCatalog::load_dir(content_dir()).unwrap();
    assert_eq!(catalog.len(), 7);
    assert!(catalog.get(SpellId(30)).unwrap().is_concentration());
}

#[test]
fn concurrent_requests_while_region_ticks() {
    let mut region_loop = RegionLoop::new(SchedulerConfig { tps: 1000, max_ticks: 300 }, "camelot");
    let world = setup(&region_loop, Arc::new(EffectDb::open_memory().unwrap()));
    for i in 0..4 {
        world.sessions().login(&format!("player{i}")).unwrap();
    }

    std::thread::scope(|scope| {
        scope.spawn(|| {
            region_loop.run();
        });
        for t in 0..4u64 {
            let world = world.clone();
            scope.spawn(move || {
                let mut rng = Rng::new(1 + t);
                for step in 0..300 {
                    if step % 5 == 0 {
                        world.player_cancel(&mut rng);
                    } else {
                        world.cast(&mut rng);
                    }
                }
            });
        }
    });

    for player in world.sessions().online() {
        assert_list_invariants(player.as_ref());
        assert_eq!(player.effects().changes_in_flight(), 0);
    }
    for npc in world.npcs() {
        assert_list_invariants(npc.as_ref());
    }
    assert!(world.sessions().logout_all() > 0);
}

#[test]
fn session_boundary_through_sqlite() {
    let region_loop = RegionLoop::new(SchedulerConfig::default(), "camelot");
    let db = Arc::new(EffectDb::open_memory().unwrap());
    let world = setup(&region_loop, db.clone());
    let region = region_loop.scheduler.clone();

    let (player, _) = world.sessions().login("Aldric").unwrap();
    let owner: Arc<dyn Living> = player.clone();
    let catalog = SpellCatalog::load_dir(content_dir()).unwrap();
    let might = catalog.cast(SpellId(1), &owner, 1.0).unwrap();
    assert!(apply_effect(&owner, might).landed());
    let venom = catalog.cast(SpellId(10), &owner, 1.0).unwrap();
    assert!(apply_effect(&owner, venom).landed());
    region.advance(10_000);

    assert_eq!(world.sessions().logout("Aldric").unwrap(), 1);
    assert_eq!(db.records().count().unwrap(), 1);

    region.advance(500_000);
    let (back, report) = world.sessions().login("Aldric").unwrap();
    assert_eq!(report.restored, 1);
    assert!(db.load_records("aldric").unwrap().is_empty());
    assert_eq!(back.bonus("strength"), 10);
    let restored = back.effects().snapshot();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].spell_id(), SpellId(1));
    assert_eq!(restored[0].remaining_ms(), 50_000);

    region.advance(50_000);
    assert_eq!(back.bonus("strength"), 0);
    assert!(back.effects().is_empty());
}

#[tokio::test]
async fn request_task_stops_on_shutdown() {
    let region_loop = RegionLoop::new(SchedulerConfig::default(), "camelot");
    let world = setup(&region_loop, Arc::new(EffectDb::open_memory().unwrap()));
    world.sessions().login("Aldric").unwrap();

    let (tx, rx) = shutdown_channel();
    let task = tokio::spawn(run_request_task(world.clone(), 9, 200, rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.trigger(ShutdownCause::Signal("SIGTERM"));

    let landed = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(landed > 0);
}
