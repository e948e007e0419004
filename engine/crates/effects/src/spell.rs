use serde::{Deserialize, Serialize};

use crate::types::{EffectGroup, SourceTier, SpellId};

/// Which reference handler drives a spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    StatBuff,
    DamageOverTime,
    CrowdControl,
    PowerDrain,
}

/// Static descriptor of a spell, shared by every effect it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spell {
    pub id: SpellId,
    pub name: String,
    pub kind: HandlerKind,
    /// Stacking family; effects of the same family compete unless grouped.
    pub family: String,
    #[serde(default)]
    pub group: Option<EffectGroup>,
    /// Stat touched by stat-style handlers. Falls back to `family`.
    #[serde(default)]
    pub stat: Option<String>,
    #[serde(default)]
    pub icon: u16,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub damage: f64,
    #[serde(default)]
    pub duration_ms: u32,
    #[serde(default)]
    pub pulse_ms: u32,
    /// Concentration points the caster pays; non-zero means funded.
    #[serde(default)]
    pub concentration: u8,
    #[serde(default)]
    pub positive: bool,
    #[serde(default)]
    pub tier: SourceTier,
    /// Spell line key, stored with persisted effects.
    #[serde(default)]
    pub line: String,
    /// Immunity granted on expiry of crowd-control effects.
    #[serde(default)]
    pub immunity_ms: u32,
}

impl Spell {
    pub fn new(id: u32, name: impl Into<String>, kind: HandlerKind, family: impl Into<String>) -> Self {
        Self {
            id: SpellId(id),
            name: name.into(),
            kind,
            family: family.into(),
            group: None,
            stat: None,
            icon: 0,
            value: 0.0,
            damage: 0.0,
            duration_ms: 0,
            pulse_ms: 0,
            concentration: 0,
            positive: false,
            tier: SourceTier::BaseLine,
            line: String::new(),
            immunity_ms: 0,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn with_damage(mut self, damage: f64) -> Self {
        self.damage = damage;
        self
    }

    pub fn with_duration(mut self, duration_ms: u32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_pulse(mut self, pulse_ms: u32) -> Self {
        self.pulse_ms = pulse_ms;
        self
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = Some(EffectGroup(group));
        self
    }

    pub fn with_stat(mut self, stat: impl Into<String>) -> Self {
        self.stat = Some(stat.into());
        self
    }

    pub fn with_concentration(mut self, points: u8) -> Self {
        self.concentration = points;
        self
    }

    pub fn with_tier(mut self, tier: SourceTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = line.into();
        self
    }

    pub fn with_immunity(mut self, immunity_ms: u32) -> Self {
        self.immunity_ms = immunity_ms;
        self
    }

    pub fn positive(mut self) -> Self {
        self.positive = true;
        self
    }

    pub fn is_concentration(&self) -> bool {
        self.concentration > 0
    }

    pub fn stat_name(&self) -> &str {
        self.stat.as_deref().unwrap_or(&self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{
            "id": 7,
            "name": "Strength of the Bear",
            "kind": "stat_buff",
            "family": "strength",
            "value": 15.0,
            "duration_ms": 60000,
            "positive": true
        }"#;
        let spell: Spell = serde_json::from_str(json).unwrap();
        assert_eq!(spell.id, SpellId(7));
        assert_eq!(spell.kind, HandlerKind::StatBuff);
        assert_eq!(spell.tier, SourceTier::BaseLine);
        assert_eq!(spell.group, None);
        assert_eq!(spell.stat_name(), "strength");
        assert!(!spell.is_concentration());
    }

    #[test]
    fn builder_sets_fields() {
        let spell = Spell::new(3, "Ablative", HandlerKind::StatBuff, "armor")
            .with_stat("armor_factor")
            .with_group(4)
            .with_concentration(2)
            .with_tier(SourceTier::SpecLine);
        assert_eq!(spell.stat_name(), "armor_factor");
        assert_eq!(spell.group, Some(EffectGroup(4)));
        assert!(spell.is_concentration());
        assert_eq!(spell.tier, SourceTier::SpecLine);
    }
}
