use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::effect::Effect;

/// Effects a caster keeps alive with concentration, wherever they landed.
pub struct ConcentrationLedger {
    capacity: usize,
    effects: Mutex<Vec<Weak<Effect>>>,
}

impl ConcentrationLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            effects: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a funded effect. False when the ledger is full.
    pub fn add(&self, effect: &Arc<Effect>) -> bool {
        let mut effects = self.effects.lock();
        effects.retain(|w| w.strong_count() > 0);
        if effects.iter().any(|w| w.as_ptr() == Arc::as_ptr(effect)) {
            return true;
        }
        if effects.len() >= self.capacity {
            tracing::debug!(capacity = self.capacity, "concentration ledger full");
            return false;
        }
        effects.push(Arc::downgrade(effect));
        true
    }

    pub fn remove(&self, effect: &Arc<Effect>) -> bool {
        let mut effects = self.effects.lock();
        let before = effects.len();
        effects.retain(|w| w.strong_count() > 0 && w.as_ptr() != Arc::as_ptr(effect));
        effects.len() != before
    }

    pub fn effects(&self) -> Vec<Arc<Effect>> {
        self.effects.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.effects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concentration points currently spent.
    pub fn used_points(&self) -> u32 {
        self.effects().iter().map(|e| e.concentration() as u32).sum()
    }

    /// Cancel everything this caster funds.
    pub fn cancel_all(&self) {
        let funded: Vec<Arc<Effect>> = {
            let mut effects = self.effects.lock();
            effects.drain(..).filter_map(|w| w.upgrade()).collect()
        };
        for effect in funded {
            effect.cancel(false);
        }
    }
}

impl std::fmt::Debug for ConcentrationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcentrationLedger")
            .field("capacity", &self.capacity)
            .field("len", &self.effects.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectState;
    use crate::living::Living;
    use crate::spell::{HandlerKind, Spell};
    use crate::test_support::{Fixture, RecordingHandler};

    fn aura(id: u32, points: u8) -> Spell {
        Spell::new(id, format!("Aura {id}"), HandlerKind::StatBuff, format!("aura{id}"))
            .with_value(5.0)
            .with_concentration(points)
            .positive()
    }

    #[test]
    fn funded_effect_registers_with_caster() {
        let fx = Fixture::new();
        let target = fx.spawn(2, "Brenna");
        let handler = RecordingHandler::cast_by(aura(1, 3), &fx.living);
        let effect = Effect::from_spell(handler, 1.0);
        let target_dyn: Arc<dyn Living> = target.clone();
        effect.start(&target_dyn).unwrap();

        assert_eq!(fx.living.concentration().len(), 1);
        assert_eq!(fx.living.concentration().used_points(), 3);
        assert!(target.effects().contains(&effect));

        effect.cancel(false);
        assert!(fx.living.concentration().is_empty());
    }

    #[test]
    fn full_ledger_refuses_start() {
        let fx = Fixture::new();
        let owner = fx.owner();
        let capacity = fx.living.concentration().capacity();
        let mut kept = Vec::new();
        for id in 0..capacity as u32 {
            let effect = Effect::from_spell(RecordingHandler::cast_by(aura(id, 1), &fx.living), 1.0);
            effect.start(&owner).unwrap();
            kept.push(effect);
        }

        let extra = Effect::from_spell(RecordingHandler::cast_by(aura(99, 1), &fx.living), 1.0);
        assert!(extra.start(&owner).is_err());
        assert_eq!(extra.state(), EffectState::Armed);
        assert!(!owner.effects().contains(&extra));
        assert_eq!(fx.living.concentration().len(), capacity);
    }

    #[test]
    fn caster_death_cancels_funded_effects_elsewhere() {
        let fx = Fixture::new();
        let target = fx.spawn(2, "Brenna");
        let target_dyn: Arc<dyn Living> = target.clone();
        let effect = Effect::from_spell(RecordingHandler::cast_by(aura(1, 2), &fx.living), 1.0);
        effect.start(&target_dyn).unwrap();

        fx.living.die();
        assert_eq!(effect.state(), EffectState::Removed);
        assert!(target.effects().is_empty());
    }

    #[test]
    fn funded_effects_outlive_their_duration() {
        let fx = Fixture::new();
        let spell = aura(1, 1).with_duration(1_000).with_pulse(500);
        let effect = Effect::from_spell(RecordingHandler::cast_by(spell, &fx.living), 1.0);
        effect.start(&fx.owner()).unwrap();

        fx.region.advance(10_000);
        assert_eq!(effect.state(), EffectState::ActiveEnabled);
    }
}
