use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use effects::{EffectConfig, EntityId, Living, LivingEntity, LivingSpec, NotificationSink};
use persistence::{EffectStore, PersistenceBridge, PersistenceError, RestoreReport};
use scheduler::RegionScheduler;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0} is already online")]
    AlreadyOnline(String),

    #[error("{0} is not online")]
    NotOnline(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Default)]
struct SessionTable {
    online: BTreeMap<String, Arc<LivingEntity>>,
    /// Keys whose effects are being restored; not yet online.
    entering: BTreeSet<String>,
}

/// Players currently in the region, and the save/restore of their effects
/// when they enter or leave it. Store I/O runs outside the table lock.
pub struct SessionManager<S: EffectStore> {
    bridge: PersistenceBridge<S>,
    region: RegionScheduler,
    config: EffectConfig,
    sink: Arc<dyn NotificationSink>,
    table: Mutex<SessionTable>,
    next_index: AtomicU32,
}

fn owner_key(name: &str) -> String {
    name.to_lowercase()
}

impl<S: EffectStore> SessionManager<S> {
    pub fn new(
        bridge: PersistenceBridge<S>,
        region: RegionScheduler,
        config: EffectConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            bridge,
            region,
            config,
            sink,
            table: Mutex::new(SessionTable::default()),
            next_index: AtomicU32::new(1),
        }
    }

    pub fn region(&self) -> &RegionScheduler {
        &self.region
    }

    /// Bring a player into the region and restore their saved effects.
    pub fn login(&self, name: &str) -> Result<(Arc<LivingEntity>, RestoreReport), SessionError> {
        let key = owner_key(name);
        {
            let mut table = self.table.lock();
            if table.online.contains_key(&key) || !table.entering.insert(key.clone()) {
                return Err(SessionError::AlreadyOnline(name.to_string()));
            }
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let player = LivingEntity::spawn(
            LivingSpec::player(EntityId::new(index, 0), name),
            &self.region,
            &self.config,
            self.sink.clone(),
        );
        let owner: Arc<dyn Living> = player.clone();
        let restored = self.bridge.restore_session(&key, &owner);

        let mut table = self.table.lock();
        table.entering.remove(&key);
        let report = match restored {
            Ok(report) => report,
            Err(err) => {
                drop(table);
                player.die();
                return Err(err.into());
            }
        };
        table.online.insert(key, player.clone());
        drop(table);
        tracing::info!(player = name, entity = %player.id(), restored = report.restored, "player entered region");
        Ok((player, report))
    }

    /// Save a player's effects and take them out of the region.
    pub fn logout(&self, name: &str) -> Result<usize, SessionError> {
        let key = owner_key(name);
        let player = self
            .table
            .lock()
            .online
            .remove(&key)
            .ok_or_else(|| SessionError::NotOnline(name.to_string()))?;

        let owner: Arc<dyn Living> = player.clone();
        let saved = self.bridge.save_session(&key, &owner);
        // timers and funded effects must not outlive the session
        player.die();
        let saved = saved?;
        tracing::info!(player = name, saved, "player left region");
        Ok(saved)
    }

    /// Log everyone out. Returns the number of effects saved.
    pub fn logout_all(&self) -> usize {
        let names: Vec<String> = self.table.lock().online.values().map(|p| p.name().to_string()).collect();
        let mut saved = 0;
        for name in names {
            match self.logout(&name) {
                Ok(count) => saved += count,
                Err(e) => tracing::error!(player = %name, "failed to save effects: {}", e),
            }
        }
        saved
    }

    pub fn get(&self, name: &str) -> Option<Arc<LivingEntity>> {
        self.table.lock().online.get(&owner_key(name)).cloned()
    }

    pub fn online(&self) -> Vec<Arc<LivingEntity>> {
        self.table.lock().online.values().cloned().collect()
    }

    pub fn online_count(&self) -> usize {
        self.table.lock().online.len()
    }
}
