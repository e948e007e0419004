use std::sync::Arc;

use super::{owner_of, CastSource};
use crate::effect::Effect;
use crate::error::HandlerResult;
use crate::handler::EffectHandler;
use crate::living::Living;
use crate::spell::Spell;
use crate::types::Pool;

/// Deals damage to the owner on every pulse.
pub struct DamageOverTime {
    source: CastSource,
}

impl DamageOverTime {
    pub fn new(source: CastSource) -> Self {
        Self { source }
    }
}

impl EffectHandler for DamageOverTime {
    fn spell(&self) -> &Spell {
        &self.source.spell
    }

    fn caster(&self) -> Option<Arc<dyn Living>> {
        self.source.caster()
    }

    fn on_start(&self, effect: &Effect) -> HandlerResult<()> {
        let owner = owner_of(effect)?;
        owner.message(format!("You are afflicted by {}.", self.source.spell.name));
        Ok(())
    }

    fn on_pulse(&self, effect: &Effect) -> HandlerResult<()> {
        let owner = owner_of(effect)?;
        if !owner.is_alive() {
            effect.cancel(false);
            return Ok(());
        }
        let damage = self.source.scaled(self.source.spell.damage, effect);
        if damage > 0 {
            let health = owner.adjust_pool(Pool::Health, -damage);
            tracing::trace!(owner = %owner.name(), damage, health, "damage over time tick");
        }
        Ok(())
    }

    fn on_expire(&self, effect: &Effect, silent: bool) -> HandlerResult<u32> {
        if !silent {
            if let Some(owner) = effect.owner() {
                owner.message(format!("{} wears off.", self.source.spell.name));
            }
        }
        Ok(0)
    }
}
