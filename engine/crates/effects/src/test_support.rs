//! Fixtures shared by the unit tests.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use scheduler::RegionScheduler;

use crate::config::EffectConfig;
use crate::effect::Effect;
use crate::effect_list::EffectList;
use crate::error::{HandlerError, HandlerResult};
use crate::handler::EffectHandler;
use crate::living::{Living, LivingEntity, LivingSpec, RecordingSink};
use crate::spell::Spell;
use crate::types::{EntityId, RestoreVars};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start,
    Pulse,
    Expire { silent: bool },
    Remove { replaced: bool },
    RestoreStart(RestoreVars),
    RestoreExpire,
}

/// Handler that records every callback it receives.
pub struct RecordingHandler {
    spell: Spell,
    calls: Mutex<Vec<Call>>,
    immunity_ms: u32,
    fail_pulse: bool,
    caster: Option<Weak<dyn Living>>,
}

impl RecordingHandler {
    fn build(spell: Spell, immunity_ms: u32, fail_pulse: bool, caster: Option<Weak<dyn Living>>) -> Arc<Self> {
        Arc::new(Self {
            spell,
            calls: Mutex::new(Vec::new()),
            immunity_ms,
            fail_pulse,
            caster,
        })
    }

    pub fn new(spell: Spell) -> Arc<Self> {
        Self::build(spell, 0, false, None)
    }

    pub fn with_immunity(spell: Spell, immunity_ms: u32) -> Arc<Self> {
        Self::build(spell, immunity_ms, false, None)
    }

    pub fn failing_pulse(spell: Spell) -> Arc<Self> {
        Self::build(spell, 0, true, None)
    }

    pub fn cast_by(spell: Spell, caster: &Arc<LivingEntity>) -> Arc<Self> {
        let caster: Arc<dyn Living> = caster.clone();
        Self::build(spell, 0, false, Some(Arc::downgrade(&caster)))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl EffectHandler for RecordingHandler {
    fn spell(&self) -> &Spell {
        &self.spell
    }

    fn caster(&self) -> Option<Arc<dyn Living>> {
        self.caster.as_ref().and_then(Weak::upgrade)
    }

    fn on_start(&self, _effect: &Effect) -> HandlerResult<()> {
        self.record(Call::Start);
        Ok(())
    }

    fn on_pulse(&self, _effect: &Effect) -> HandlerResult<()> {
        self.record(Call::Pulse);
        if self.fail_pulse {
            return Err(HandlerError::Failed("pulse failed".into()));
        }
        Ok(())
    }

    fn on_expire(&self, _effect: &Effect, silent: bool) -> HandlerResult<u32> {
        self.record(Call::Expire { silent });
        Ok(self.immunity_ms)
    }

    fn on_remove(&self, _effect: &Effect, was_replaced: bool) -> HandlerResult<()> {
        self.record(Call::Remove {
            replaced: was_replaced,
        });
        Ok(())
    }

    fn on_restore_start(&self, _effect: &Effect, vars: &RestoreVars) -> HandlerResult<()> {
        self.record(Call::RestoreStart(*vars));
        Ok(())
    }

    fn on_restore_expire(&self, _effect: &Effect, _vars: &RestoreVars, _silent: bool) -> HandlerResult<u32> {
        self.record(Call::RestoreExpire);
        Ok(self.immunity_ms)
    }
}

/// One region with one player living on it.
pub struct Fixture {
    pub region: RegionScheduler,
    pub sink: Arc<RecordingSink>,
    pub living: Arc<LivingEntity>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EffectConfig::strict())
    }

    pub fn lenient() -> Self {
        Self::with_config(EffectConfig::default())
    }

    fn with_config(config: EffectConfig) -> Self {
        let region = RegionScheduler::new("test");
        let sink = RecordingSink::new();
        let living = LivingEntity::spawn(
            LivingSpec::player(EntityId::new(1, 0), "Aldric"),
            &region,
            &config,
            sink.clone(),
        );
        Self { region, sink, living }
    }

    /// Another living on the same region.
    pub fn spawn(&self, index: u32, name: &str) -> Arc<LivingEntity> {
        LivingEntity::spawn(
            LivingSpec::player(EntityId::new(index, 0), name),
            &self.region,
            &EffectConfig::strict(),
            self.sink.clone(),
        )
    }

    pub fn spawn_npc(&self, index: u32, name: &str) -> Arc<LivingEntity> {
        LivingEntity::spawn(
            LivingSpec::npc(EntityId::new(index, 0), name),
            &self.region,
            &EffectConfig::strict(),
            self.sink.clone(),
        )
    }

    pub fn owner(&self) -> Arc<dyn Living> {
        self.living.clone()
    }

    pub fn list(&self) -> &EffectList {
        self.living.effects()
    }
}
