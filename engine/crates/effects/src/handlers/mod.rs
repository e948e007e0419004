//! Reference handlers for the spell kinds shipped with the server.

mod crowd_control;
mod damage_over_time;
mod power_drain;
mod stat_buff;

use std::sync::{Arc, Weak};

use crate::effect::Effect;
use crate::error::{HandlerError, HandlerResult};
use crate::handler::EffectHandler;
use crate::living::Living;
use crate::spell::{HandlerKind, Spell};

pub use crowd_control::CrowdControl;
pub use damage_over_time::DamageOverTime;
pub use power_drain::PowerDrain;
pub use stat_buff::StatBuff;

/// Handler for a spell, dispatched on its kind.
pub fn build(spell: Arc<Spell>, caster: Option<Weak<dyn Living>>) -> Arc<dyn EffectHandler> {
    let source = CastSource::new(spell, caster);
    match source.spell.kind {
        HandlerKind::StatBuff => Arc::new(StatBuff::new(source)),
        HandlerKind::DamageOverTime => Arc::new(DamageOverTime::new(source)),
        HandlerKind::CrowdControl => Arc::new(CrowdControl::new(source)),
        HandlerKind::PowerDrain => Arc::new(PowerDrain::new(source)),
    }
}

/// The spell a handler runs and who cast it.
#[derive(Clone)]
pub struct CastSource {
    pub spell: Arc<Spell>,
    caster: Option<Weak<dyn Living>>,
}

impl CastSource {
    pub fn new(spell: Arc<Spell>, caster: Option<Weak<dyn Living>>) -> Self {
        Self { spell, caster }
    }

    pub fn caster(&self) -> Option<Arc<dyn Living>> {
        self.caster.as_ref().and_then(Weak::upgrade)
    }

    /// Spell magnitude scaled by the effect's effectiveness.
    fn scaled(&self, base: f64, effect: &Effect) -> i32 {
        (base * effect.effectiveness()).round() as i32
    }
}

fn owner_of(effect: &Effect) -> HandlerResult<Arc<dyn Living>> {
    effect.owner().ok_or(HandlerError::OwnerGone)
}
