use std::sync::Arc;

use super::{owner_of, CastSource};
use crate::effect::Effect;
use crate::error::HandlerResult;
use crate::handler::EffectHandler;
use crate::living::Living;
use crate::spell::Spell;

/// Sets a control flag (stun, mesmerize) on the owner. Players get an
/// immunity window when it ends.
pub struct CrowdControl {
    source: CastSource,
}

impl CrowdControl {
    pub fn new(source: CastSource) -> Self {
        Self { source }
    }
}

impl EffectHandler for CrowdControl {
    fn spell(&self) -> &Spell {
        &self.source.spell
    }

    fn caster(&self) -> Option<Arc<dyn Living>> {
        self.source.caster()
    }

    fn on_start(&self, effect: &Effect) -> HandlerResult<()> {
        let owner = owner_of(effect)?;
        owner.adjust_bonus(self.source.spell.stat_name(), 1);
        owner.message(format!("You are held by {}!", self.source.spell.name));
        Ok(())
    }

    fn on_expire(&self, effect: &Effect, silent: bool) -> HandlerResult<u32> {
        let Some(owner) = effect.owner() else {
            return Ok(0);
        };
        owner.adjust_bonus(self.source.spell.stat_name(), -1);
        if !silent {
            owner.message(format!("You recover from {}.", self.source.spell.name));
        }
        if owner.is_player() {
            Ok(self.source.spell.immunity_ms)
        } else {
            Ok(0)
        }
    }
}
