use std::sync::Arc;

use crate::effect::{Effect, EffectState};
use crate::error::EffectError;
use crate::living::Living;
use crate::resolver::{resolve, RejectReason, Resolution};

/// Re-resolutions allowed when an overwrite target ends mid-apply.
const MAX_RESOLVE_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub enum ApplyOutcome {
    /// The effect was started as a new list entry.
    Started(Arc<Effect>),
    /// An existing entry took over the incoming spell; the incoming effect
    /// is spent.
    Overwrote(Arc<Effect>),
    Rejected(RejectReason),
    Failed(EffectError),
}

impl ApplyOutcome {
    /// The effect now carrying the spell, if it landed.
    pub fn effect(&self) -> Option<&Arc<Effect>> {
        match self {
            ApplyOutcome::Started(e) | ApplyOutcome::Overwrote(e) => Some(e),
            _ => None,
        }
    }

    pub fn landed(&self) -> bool {
        self.effect().is_some()
    }
}

/// Resolve an armed effect against `target`'s list and start or overwrite
/// accordingly, as one change batch.
pub fn apply_effect(target: &Arc<dyn Living>, effect: Arc<Effect>) -> ApplyOutcome {
    let handler = effect.handler();
    if !target.is_alive() {
        return reject(target, &handler.caster(), RejectReason::TargetInactive);
    }

    let list = target.effects();
    let _applying = list.lock_applies();
    let _batch = list.batch();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let current: Vec<_> = list.snapshot().into_iter().filter(|e| !e.is_ending()).collect();
        let profiles: Vec<_> = current.iter().map(|e| e.profile()).collect();

        return match resolve(&profiles, &effect.profile()) {
            Resolution::Coexist => match effect.start(target) {
                Ok(()) => ApplyOutcome::Started(effect),
                Err(err) => ApplyOutcome::Failed(err),
            },
            Resolution::Overwrite(index) => {
                let existing = current[index].clone();
                match existing.overwrite(&effect) {
                    Ok(()) => ApplyOutcome::Overwrote(existing),
                    // the region thread ended `existing` after the snapshot
                    Err(EffectError::NotActive { .. })
                        if attempts < MAX_RESOLVE_ATTEMPTS && effect.state() == EffectState::Armed =>
                    {
                        tracing::debug!(target = %target.name(), effect = %effect, "overwrite target ended, resolving again");
                        continue;
                    }
                    Err(err) => ApplyOutcome::Failed(err),
                }
            }
            Resolution::Reject { reason, .. } => reject(target, &handler.caster(), reason),
        };
    }
}

fn reject(target: &Arc<dyn Living>, caster: &Option<Arc<dyn Living>>, reason: RejectReason) -> ApplyOutcome {
    tracing::debug!(target = %target.name(), ?reason, "effect rejected");
    if let Some(caster) = caster {
        caster.message(reason.message(target.name()));
    }
    ApplyOutcome::Rejected(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spell::{HandlerKind, Spell};
    use crate::test_support::{Call, Fixture, RecordingHandler};

    fn strength(id: u32, value: f64, duration_ms: u32) -> Spell {
        Spell::new(id, format!("Strength {value}"), HandlerKind::StatBuff, "strength")
            .with_value(value)
            .with_duration(duration_ms)
            .positive()
    }

    #[test]
    fn coexisting_effect_is_started() {
        let fx = Fixture::new();
        let outcome = apply_effect(&fx.owner(), Effect::from_spell(RecordingHandler::new(strength(1, 10.0, 60_000)), 1.0));
        assert!(matches!(outcome, ApplyOutcome::Started(_)));
        assert_eq!(fx.list().len(), 1);
    }

    #[test]
    fn stronger_effect_overwrites_in_place() {
        let fx = Fixture::new();
        let first = apply_effect(&fx.owner(), Effect::from_spell(RecordingHandler::new(strength(1, 10.0, 60_000)), 1.0));
        let first = first.effect().unwrap().clone();
        let id = first.id();

        let stronger = RecordingHandler::new(strength(2, 15.0, 30_000));
        let outcome = apply_effect(&fx.owner(), Effect::from_spell(stronger.clone(), 1.0));
        let ApplyOutcome::Overwrote(carrier) = outcome else {
            panic!("expected overwrite, got {outcome:?}");
        };
        assert!(Arc::ptr_eq(&carrier, &first));
        assert_eq!(carrier.id(), id);
        assert_eq!(fx.list().len(), 1);
        assert_eq!(stronger.calls(), vec![Call::Start]);
    }

    #[test]
    fn effectiveness_scales_magnitude() {
        let fx = Fixture::new();
        apply_effect(&fx.owner(), Effect::from_spell(RecordingHandler::new(strength(1, 10.0, 60_000)), 1.0));
        // 15 * 0.5 < 10
        let outcome = apply_effect(&fx.owner(), Effect::from_spell(RecordingHandler::new(strength(2, 15.0, 60_000)), 0.5));
        assert!(matches!(outcome, ApplyOutcome::Rejected(RejectReason::Weaker)));
    }

    #[test]
    fn rejection_notifies_caster() {
        let fx = Fixture::new();
        let caster = fx.spawn(2, "Brenna");
        apply_effect(&fx.owner(), Effect::from_spell(RecordingHandler::new(strength(1, 10.0, 60_000)), 1.0));
        fx.sink.take();

        let weak = RecordingHandler::cast_by(strength(2, 5.0, 60_000), &caster);
        let effect = Effect::from_spell(weak, 1.0);
        let outcome = apply_effect(&fx.owner(), effect.clone());
        assert!(matches!(outcome, ApplyOutcome::Rejected(RejectReason::Weaker)));
        assert_eq!(effect.state(), EffectState::Armed);
        assert_eq!(fx.sink.messages(), vec!["Aldric already has that effect.".to_string()]);
    }

    #[test]
    fn dead_target_rejects() {
        let fx = Fixture::new();
        fx.living.die();
        let outcome = apply_effect(&fx.owner(), Effect::from_spell(RecordingHandler::new(strength(1, 10.0, 60_000)), 1.0));
        assert!(matches!(outcome, ApplyOutcome::Rejected(RejectReason::TargetInactive)));
        assert!(!outcome.landed());
    }
}
