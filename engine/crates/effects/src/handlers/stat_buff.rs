use std::sync::Arc;

use super::{owner_of, CastSource};
use crate::effect::Effect;
use crate::error::HandlerResult;
use crate::handler::EffectHandler;
use crate::living::Living;
use crate::spell::Spell;
use crate::types::RestoreVars;

/// Adds a flat bonus to one stat; debuffs subtract it.
pub struct StatBuff {
    source: CastSource,
}

impl StatBuff {
    pub fn new(source: CastSource) -> Self {
        Self { source }
    }

    fn amount(&self, effect: &Effect) -> i32 {
        let magnitude = self.source.scaled(self.source.spell.value, effect);
        if self.source.spell.positive {
            magnitude
        } else {
            -magnitude
        }
    }

    fn apply(&self, effect: &Effect, amount: i32) -> HandlerResult<()> {
        let owner = owner_of(effect)?;
        owner.adjust_bonus(self.source.spell.stat_name(), amount);
        owner.message(format!("You are affected by {}.", self.source.spell.name));
        Ok(())
    }

    fn revert(&self, effect: &Effect, amount: i32, silent: bool) -> HandlerResult<u32> {
        // owner already gone: nothing left to revert
        let Some(owner) = effect.owner() else {
            return Ok(0);
        };
        owner.adjust_bonus(self.source.spell.stat_name(), -amount);
        if !silent {
            owner.message(format!("{} fades.", self.source.spell.name));
        }
        Ok(0)
    }
}

impl EffectHandler for StatBuff {
    fn spell(&self) -> &Spell {
        &self.source.spell
    }

    fn caster(&self) -> Option<Arc<dyn Living>> {
        self.source.caster()
    }

    fn on_start(&self, effect: &Effect) -> HandlerResult<()> {
        self.apply(effect, self.amount(effect))
    }

    fn on_expire(&self, effect: &Effect, silent: bool) -> HandlerResult<u32> {
        self.revert(effect, self.amount(effect), silent)
    }

    fn on_restore_start(&self, effect: &Effect, vars: &RestoreVars) -> HandlerResult<()> {
        self.apply(effect, vars.get(1))
    }

    fn on_restore_expire(&self, effect: &Effect, vars: &RestoreVars, silent: bool) -> HandlerResult<u32> {
        self.revert(effect, vars.get(1), silent)
    }

    fn restore_vars(&self, effect: &Effect) -> Option<RestoreVars> {
        Some(RestoreVars([
            self.source.spell.id.0 as i32,
            self.amount(effect),
            0,
            0,
            0,
            0,
        ]))
    }
}
