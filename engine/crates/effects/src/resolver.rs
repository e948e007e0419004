//! Stacking rules: does an incoming effect coexist with, replace, or bounce
//! off what the target already carries?

use crate::types::{EffectGroup, SourceTier};

const EPSILON: f64 = 1e-9;

/// What the resolver needs to know about one effect. Magnitudes are
/// already scaled by effectiveness.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectProfile {
    pub family: String,
    pub group: Option<EffectGroup>,
    pub value: f64,
    pub damage: f64,
    pub tier: SourceTier,
    pub concentration: bool,
    pub immune: bool,
    pub duration_ms: u32,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// One side is funded by concentration.
    ConcentrationFunded,
    /// The target is inside the existing effect's immunity window.
    Immune,
    /// The incoming effect is weaker.
    Weaker,
    /// Equal strength and the incoming effect would not last longer.
    NotLonger,
    /// The target cannot receive effects.
    TargetInactive,
}

impl RejectReason {
    /// Text for the caster.
    pub fn message(&self, target: &str) -> String {
        match self {
            RejectReason::Immune => format!("{target} can't have that effect again yet!"),
            RejectReason::TargetInactive => format!("{target} can't be affected right now."),
            _ => format!("{target} already has that effect."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Coexist,
    /// Overwrite the existing effect at this index.
    Overwrite(usize),
    Reject { index: usize, reason: RejectReason },
}

/// Whether two effects compete for the same slot. When either carries a
/// group tag, they compete only if both tags are equal.
pub fn competes(existing: &EffectProfile, incoming: &EffectProfile) -> bool {
    match (existing.group, incoming.group) {
        (None, None) => existing.family == incoming.family,
        (a, b) => a == b,
    }
}

/// Compare a competing pair. `Ok` means the incoming effect should overwrite.
pub fn is_new_better(existing: &EffectProfile, incoming: &EffectProfile) -> Result<(), RejectReason> {
    if existing.concentration || incoming.concentration {
        return Err(RejectReason::ConcentrationFunded);
    }
    if existing.immune {
        return Err(RejectReason::Immune);
    }
    if incoming.value < existing.value - EPSILON || incoming.damage < existing.damage - EPSILON {
        return Err(RejectReason::Weaker);
    }
    if incoming.value > existing.value + EPSILON || incoming.damage > existing.damage + EPSILON {
        return Ok(());
    }
    match incoming.tier.cmp(&existing.tier) {
        std::cmp::Ordering::Greater => Ok(()),
        std::cmp::Ordering::Less => Err(RejectReason::Weaker),
        std::cmp::Ordering::Equal => {
            // refresh only if it buys time
            let lasts_longer = match (existing.duration_ms, incoming.duration_ms) {
                (0, _) => false,
                (_, 0) => true,
                (_, incoming_ms) => incoming_ms as u64 > existing.remaining_ms,
            };
            if lasts_longer {
                Ok(())
            } else {
                Err(RejectReason::NotLonger)
            }
        }
    }
}

/// Decide against the target's current effects, in list order. The first
/// competing effect decides.
pub fn resolve(existing: &[EffectProfile], incoming: &EffectProfile) -> Resolution {
    let Some(index) = existing.iter().position(|e| competes(e, incoming)) else {
        return Resolution::Coexist;
    };
    match is_new_better(&existing[index], incoming) {
        Ok(()) => Resolution::Overwrite(index),
        Err(reason) => Resolution::Reject { index, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(family: &str, value: f64, duration_ms: u32) -> EffectProfile {
        EffectProfile {
            family: family.to_string(),
            group: None,
            value,
            damage: 0.0,
            tier: SourceTier::BaseLine,
            concentration: false,
            immune: false,
            duration_ms,
            remaining_ms: duration_ms as u64,
        }
    }

    #[test]
    fn different_families_coexist() {
        let existing = vec![profile("strength", 10.0, 60_000)];
        assert_eq!(resolve(&existing, &profile("dexterity", 10.0, 60_000)), Resolution::Coexist);
        assert_eq!(resolve(&[], &profile("dexterity", 10.0, 60_000)), Resolution::Coexist);
    }

    #[test]
    fn stronger_overwrites_weaker_rejects() {
        let existing = vec![profile("strength", 10.0, 60_000)];
        assert_eq!(resolve(&existing, &profile("strength", 15.0, 30_000)), Resolution::Overwrite(0));
        assert_eq!(
            resolve(&existing, &profile("strength", 5.0, 90_000)),
            Resolution::Reject { index: 0, reason: RejectReason::Weaker }
        );
    }

    #[test]
    fn weaker_damage_rejects_even_with_higher_value() {
        let mut old = profile("poison", 0.0, 20_000);
        old.damage = 12.0;
        let mut new = profile("poison", 5.0, 20_000);
        new.damage = 8.0;
        assert_eq!(is_new_better(&old, &new), Err(RejectReason::Weaker));
    }

    #[test]
    fn equal_strength_refreshes_only_when_longer() {
        let mut old = profile("strength", 10.0, 60_000);
        old.remaining_ms = 20_000;
        assert_eq!(is_new_better(&old, &profile("strength", 10.0, 30_000)), Ok(()));
        assert_eq!(
            is_new_better(&old, &profile("strength", 10.0, 20_000)),
            Err(RejectReason::NotLonger)
        );
    }

    #[test]
    fn unlimited_durations_at_equal_strength() {
        let unlimited = profile("strength", 10.0, 0);
        assert_eq!(
            is_new_better(&unlimited, &profile("strength", 10.0, 60_000)),
            Err(RejectReason::NotLonger)
        );
        let timed = profile("strength", 10.0, 60_000);
        assert_eq!(is_new_better(&timed, &profile("strength", 10.0, 0)), Ok(()));
    }

    #[test]
    fn spec_line_breaks_ties() {
        let base = profile("strength", 10.0, 60_000);
        let mut spec = profile("strength", 10.0, 10_000);
        spec.tier = SourceTier::SpecLine;
        assert_eq!(is_new_better(&base, &spec), Ok(()));
        assert_eq!(is_new_better(&spec, &base), Err(RejectReason::Weaker));
    }

    #[test]
    fn concentration_and_immunity_always_reject() {
        let mut funded = profile("aura", 1.0, 0);
        funded.concentration = true;
        assert_eq!(
            is_new_better(&funded, &profile("aura", 100.0, 0)),
            Err(RejectReason::ConcentrationFunded)
        );
        let mut incoming = profile("aura", 100.0, 0);
        incoming.concentration = true;
        assert_eq!(
            is_new_better(&profile("aura", 1.0, 0), &incoming),
            Err(RejectReason::ConcentrationFunded)
        );

        let mut immune = profile("stun", 0.0, 5_000);
        immune.immune = true;
        assert_eq!(
            is_new_better(&immune, &profile("stun", 50.0, 9_000)),
            Err(RejectReason::Immune)
        );
    }

    #[test]
    fn group_tags_override_family() {
        let mut a = profile("armor", 10.0, 60_000);
        a.group = Some(EffectGroup(7));
        let mut b = profile("absorb", 12.0, 60_000);
        b.group = Some(EffectGroup(7));
        assert!(competes(&a, &b));

        b.group = Some(EffectGroup(8));
        assert!(!competes(&a, &b));

        // a tag on only one side never matches, even within a family
        let untagged = profile("armor", 10.0, 60_000);
        assert!(!competes(&a, &untagged));
        assert!(!competes(&untagged, &a));
    }

    #[test]
    fn first_competitor_in_list_order_decides() {
        let existing = vec![
            profile("dexterity", 10.0, 60_000),
            profile("strength", 20.0, 60_000),
            profile("strength", 5.0, 60_000),
        ];
        assert_eq!(
            resolve(&existing, &profile("strength", 10.0, 60_000)),
            Resolution::Reject { index: 1, reason: RejectReason::Weaker }
        );
    }

    #[test]
    fn rejection_messages() {
        assert_eq!(RejectReason::Immune.message("Brenna"), "Brenna can't have that effect again yet!");
        assert_eq!(RejectReason::Weaker.message("Brenna"), "Brenna already has that effect.");
    }
}
