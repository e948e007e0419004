use std::sync::Arc;

use super::{owner_of, CastSource};
use crate::effect::Effect;
use crate::error::HandlerResult;
use crate::handler::EffectHandler;
use crate::living::Living;
use crate::spell::Spell;
use crate::types::Pool;

/// Concentration-funded effect that costs its caster mana on every pulse
/// and cancels itself once the caster runs dry.
pub struct PowerDrain {
    source: CastSource,
}

impl PowerDrain {
    pub fn new(source: CastSource) -> Self {
        Self { source }
    }
}

impl EffectHandler for PowerDrain {
    fn spell(&self) -> &Spell {
        &self.source.spell
    }

    fn caster(&self) -> Option<Arc<dyn Living>> {
        self.source.caster()
    }

    fn on_start(&self, effect: &Effect) -> HandlerResult<()> {
        let owner = owner_of(effect)?;
        owner.message(format!("{} surrounds you.", self.source.spell.name));
        Ok(())
    }

    fn on_pulse(&self, effect: &Effect) -> HandlerResult<()> {
        let Some(caster) = self.caster().filter(|c| c.is_alive()) else {
            effect.cancel(false);
            return Ok(());
        };
        let cost = self.source.spell.value.round() as i32;
        if caster.pool(Pool::Mana) < cost {
            caster.message(format!(
                "You do not have enough power to maintain {}.",
                self.source.spell.name
            ));
            effect.cancel(false);
            return Ok(());
        }
        caster.adjust_pool(Pool::Mana, -cost);

        let damage = self.source.scaled(self.source.spell.damage, effect);
        if damage > 0 {
            owner_of(effect)?.adjust_pool(Pool::Health, -damage);
        }
        Ok(())
    }

    fn on_expire(&self, effect: &Effect, silent: bool) -> HandlerResult<u32> {
        if !silent {
            if let Some(owner) = effect.owner() {
                owner.message(format!("{} dissipates.", self.source.spell.name));
            }
        }
        Ok(0)
    }
}
