//! Synthetic request load against one region: casts, player cancels and
//! session churn issued from async tasks while the region thread ticks.

use std::sync::Arc;
use std::time::Duration;

use effects::{
    apply_effect, ApplyOutcome, CancelOutcome, EffectConfig, EntityId, Living, LivingEntity, LivingSpec,
    NotificationSink, SpellCatalog, SpellId,
};
use persistence::EffectStore;

use crate::session::SessionManager;
use crate::shutdown::ShutdownRx;

/// xorshift64; the simulation only needs a cheap reproducible stream.
#[derive(Debug, Clone)]
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            0
        } else {
            (self.next_u64() % n as u64) as usize
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResult {
    Landed,
    Rejected,
    Failed,
    Cancelled,
    CancelDenied,
    Idle,
}

/// Players, NPCs and spells one region simulates with.
pub struct RegionWorld<S: EffectStore> {
    catalog: Arc<SpellCatalog>,
    sessions: Arc<SessionManager<S>>,
    npcs: Vec<Arc<LivingEntity>>,
    spells: Vec<SpellId>,
}

impl<S: EffectStore> RegionWorld<S> {
    pub fn new(
        catalog: Arc<SpellCatalog>,
        sessions: Arc<SessionManager<S>>,
        npc_count: u32,
        config: &EffectConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let npcs = (0..npc_count)
            .map(|i| {
                LivingEntity::spawn(
                    LivingSpec::npc(EntityId::new(i, 1), format!("npc{i}")),
                    sessions.region(),
                    config,
                    sink.clone(),
                )
            })
            .collect();
        let spells = catalog.iter().map(|s| s.id).collect();
        Self {
            catalog,
            sessions,
            npcs,
            spells,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<S>> {
        &self.sessions
    }

    pub fn npcs(&self) -> &[Arc<LivingEntity>] {
        &self.npcs
    }

    /// Every living a request may target.
    fn livings(&self) -> Vec<Arc<dyn Living>> {
        let mut all: Vec<Arc<dyn Living>> = Vec::with_capacity(self.npcs.len());
        for player in self.sessions.online() {
            all.push(player);
        }
        for npc in &self.npcs {
            all.push(npc.clone());
        }
        all
    }

    /// One cast of a random spell by a random online player.
    pub fn cast(&self, rng: &mut Rng) -> ActionResult {
        let players = self.sessions.online();
        if players.is_empty() || self.spells.is_empty() {
            return ActionResult::Idle;
        }
        let caster: Arc<dyn Living> = players[rng.below(players.len())].clone();
        let spell_id = self.spells[rng.below(self.spells.len())];
        let Some(spell) = self.catalog.get(spell_id) else {
            return ActionResult::Idle;
        };

        let target = if spell.positive || spell.is_concentration() {
            caster.clone()
        } else {
            let targets = self.livings();
            targets[rng.below(targets.len())].clone()
        };
        if !target.is_alive() {
            self.respawn(&target);
        }

        let effectiveness = 0.75 + (rng.below(51) as f64) / 100.0;
        let Some(effect) = self.catalog.cast(spell_id, &caster, effectiveness) else {
            return ActionResult::Idle;
        };
        match apply_effect(&target, effect) {
            ApplyOutcome::Started(_) | ApplyOutcome::Overwrote(_) => ActionResult::Landed,
            ApplyOutcome::Rejected(_) => ActionResult::Rejected,
            ApplyOutcome::Failed(err) => {
                tracing::debug!(caster = %caster.name(), error = %err, "cast failed");
                ActionResult::Failed
            }
        }
    }

    /// A random online player tries to remove one of their effects.
    pub fn player_cancel(&self, rng: &mut Rng) -> ActionResult {
        let players = self.sessions.online();
        if players.is_empty() {
            return ActionResult::Idle;
        }
        let player = &players[rng.below(players.len())];
        let effects = player.effects().snapshot();
        if effects.is_empty() {
            return ActionResult::Idle;
        }
        match effects[rng.below(effects.len())].cancel(true) {
            CancelOutcome::Removed | CancelOutcome::Immune => ActionResult::Cancelled,
            CancelOutcome::Denied(_) => ActionResult::CancelDenied,
            CancelOutcome::Ignored => ActionResult::Idle,
        }
    }

    fn respawn(&self, target: &Arc<dyn Living>) {
        if let Some(npc) = self.npcs.iter().find(|n| n.id() == target.id()) {
            npc.revive();
        }
    }
}

/// Issue casts and cancels at `actions_per_second` until shutdown.
pub async fn run_request_task<S: EffectStore + 'static>(
    world: Arc<RegionWorld<S>>,
    seed: u64,
    actions_per_second: u32,
    mut shutdown: ShutdownRx,
) -> usize {
    let mut rng = Rng::new(seed);
    let period = Duration::from_secs_f64(1.0 / actions_per_second.max(1) as f64);
    let mut interval = tokio::time::interval(period);
    let mut landed = 0;
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = interval.tick() => {
                let result = if rng.below(5) == 0 {
                    world.player_cancel(&mut rng)
                } else {
                    world.cast(&mut rng)
                };
                if result == ActionResult::Landed {
                    landed += 1;
                }
            }
        }
    }
    tracing::debug!(seed, landed, "request task stopped");
    landed
}

/// Log a random player out and back in every `period` until shutdown.
pub async fn run_session_churn<S: EffectStore + 'static>(
    world: Arc<RegionWorld<S>>,
    seed: u64,
    period: Duration,
    mut shutdown: ShutdownRx,
) {
    let mut rng = Rng::new(seed);
    let mut interval = tokio::time::interval(period);
    // first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = interval.tick() => {
                let online = world.sessions().online();
                if online.is_empty() {
                    continue;
                }
                let name = online[rng.below(online.len())].name().to_string();
                if let Err(e) = world.sessions().logout(&name) {
                    tracing::warn!(player = %name, "logout failed: {}", e);
                }
                if let Err(e) = world.sessions().login(&name) {
                    tracing::warn!(player = %name, "login failed: {}", e);
                }
            }
        }
    }
}
