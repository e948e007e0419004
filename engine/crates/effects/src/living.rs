use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use scheduler::RegionScheduler;
use serde::Serialize;

use crate::concentration::ConcentrationLedger;
use crate::config::EffectConfig;
use crate::effect_list::EffectList;
use crate::types::{EffectId, EntityId, Pool, SpellId};

/// Client-facing view of one effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectUpdate {
    pub id: EffectId,
    pub spell_id: SpellId,
    pub name: String,
    pub icon: u16,
    pub remaining_ms: u64,
    pub immune: bool,
    /// Shown as fading instead of a countdown.
    pub fading: bool,
    pub removed: bool,
}

/// Outbound notifications for the owner's client.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    EffectsChanged(Vec<EffectUpdate>),
    Message(String),
}

/// Delivery seam towards the network layer.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, owner: EntityId, notice: Notice);
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, owner: EntityId, notice: Notice) {
        match notice {
            Notice::EffectsChanged(updates) => {
                tracing::debug!(%owner, count = updates.len(), "effects changed");
            }
            Notice::Message(text) => tracing::debug!(%owner, %text, "message"),
        }
    }
}

/// Sink that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<(EntityId, Notice)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<(EntityId, Notice)> {
        std::mem::take(&mut *self.notices.lock())
    }

    /// Number of effects-changed notifications received so far.
    pub fn change_count(&self) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|(_, n)| matches!(n, Notice::EffectsChanged(_)))
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter_map(|(_, n)| match n {
                Notice::Message(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_changes(&self) -> Option<Vec<EffectUpdate>> {
        self.notices.lock().iter().rev().find_map(|(_, n)| match n {
            Notice::EffectsChanged(updates) => Some(updates.clone()),
            _ => None,
        })
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, owner: EntityId, notice: Notice) {
        self.notices.lock().push((owner, notice));
    }
}

/// What the effect engine needs from an entity that can carry effects.
pub trait Living: Send + Sync {
    fn id(&self) -> EntityId;
    fn name(&self) -> &str;
    fn is_alive(&self) -> bool;
    fn is_player(&self) -> bool;
    fn region(&self) -> &RegionScheduler;
    fn effects(&self) -> &EffectList;
    fn concentration(&self) -> &ConcentrationLedger;

    fn pool(&self, pool: Pool) -> i32;
    /// Add `delta` to a pool, clamped to its bounds. Returns the new value.
    fn adjust_pool(&self, pool: Pool, delta: i32) -> i32;

    fn bonus(&self, stat: &str) -> i32;
    fn adjust_bonus(&self, stat: &str, delta: i32);

    fn notify(&self, notice: Notice);

    fn message(&self, text: String) {
        self.notify(Notice::Message(text));
    }
}

/// Creation parameters of a [`LivingEntity`].
#[derive(Debug, Clone)]
pub struct LivingSpec {
    pub id: EntityId,
    pub name: String,
    pub player: bool,
    pub max_health: i32,
    pub max_mana: i32,
    pub max_endurance: i32,
}

impl LivingSpec {
    pub fn player(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            player: true,
            max_health: 100,
            max_mana: 100,
            max_endurance: 100,
        }
    }

    pub fn npc(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            player: false,
            ..Self::player(id, name)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolValue {
    current: i32,
    max: i32,
}

#[derive(Debug)]
struct Pools {
    health: PoolValue,
    mana: PoolValue,
    endurance: PoolValue,
}

impl Pools {
    fn get_mut(&mut self, pool: Pool) -> &mut PoolValue {
        match pool {
            Pool::Health => &mut self.health,
            Pool::Mana => &mut self.mana,
            Pool::Endurance => &mut self.endurance,
        }
    }
}

/// Plain in-memory living used by the server and the tests.
pub struct LivingEntity {
    id: EntityId,
    name: String,
    player: bool,
    alive: AtomicBool,
    region: RegionScheduler,
    effects: EffectList,
    concentration: ConcentrationLedger,
    pools: Mutex<Pools>,
    bonuses: Mutex<BTreeMap<String, i32>>,
    sink: Arc<dyn NotificationSink>,
}

impl LivingEntity {
    pub fn spawn(
        spec: LivingSpec,
        region: &RegionScheduler,
        config: &EffectConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<LivingEntity>| {
            let owner: Weak<dyn Living> = me.clone();
            Self {
                id: spec.id,
                name: spec.name,
                player: spec.player,
                alive: AtomicBool::new(true),
                region: region.clone(),
                effects: EffectList::new(owner, config.strict_batches),
                concentration: ConcentrationLedger::new(config.concentration_capacity),
                pools: Mutex::new(Pools {
                    health: PoolValue { current: spec.max_health, max: spec.max_health },
                    mana: PoolValue { current: spec.max_mana, max: spec.max_mana },
                    endurance: PoolValue { current: spec.max_endurance, max: spec.max_endurance },
                }),
                bonuses: Mutex::new(BTreeMap::new()),
                sink,
            }
        })
    }

    /// Kill the entity: every effect it carries or funds is cancelled.
    pub fn die(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(entity = %self.id, name = %self.name, "living died");
        self.effects.cancel_all();
        self.concentration.cancel_all();
    }

    pub fn revive(&self) {
        self.alive.store(true, Ordering::SeqCst);
        let mut pools = self.pools.lock();
        pools.health.current = pools.health.max;
    }
}

impl Living for LivingEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_player(&self) -> bool {
        self.player
    }

    fn region(&self) -> &RegionScheduler {
        &self.region
    }

    fn effects(&self) -> &EffectList {
        &self.effects
    }

    fn concentration(&self) -> &ConcentrationLedger {
        &self.concentration
    }

    fn pool(&self, pool: Pool) -> i32 {
        self.pools.lock().get_mut(pool).current
    }

    fn adjust_pool(&self, pool: Pool, delta: i32) -> i32 {
        let value = {
            let mut pools = self.pools.lock();
            let slot = pools.get_mut(pool);
            slot.current = slot.current.saturating_add(delta).clamp(0, slot.max);
            slot.current
        };
        if pool == Pool::Health && value == 0 {
            self.die();
        }
        value
    }

    fn bonus(&self, stat: &str) -> i32 {
        self.bonuses.lock().get(stat).copied().unwrap_or(0)
    }

    fn adjust_bonus(&self, stat: &str, delta: i32) {
        let mut bonuses = self.bonuses.lock();
        let entry = bonuses.entry(stat.to_string()).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            bonuses.remove(stat);
        }
    }

    fn notify(&self, notice: Notice) {
        self.sink.notify(self.id, notice);
    }
}

impl std::fmt::Debug for LivingEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivingEntity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
