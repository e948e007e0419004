use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EntityId {
    pub index: u32,
    pub generation: u32,
}

impl EntityId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn to_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    pub fn from_u64(val: u64) -> Self {
        Self {
            index: val as u32,
            generation: (val >> 32) as u32,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E({}v{})", self.index, self.generation)
    }
}

/// Internal id of an effect inside its owner's list. 0 means "not in a list".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EffectId(pub u16);

impl std::fmt::Display for EffectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct SpellId(pub u32);

impl std::fmt::Display for SpellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "spell:{}", self.0)
    }
}

/// Explicit stacking group. Effects sharing a group never stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EffectGroup(pub u32);

/// Where a spell comes from. Specialised lines beat base lines at equal magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    #[default]
    BaseLine,
    SpecLine,
}

/// Resource pools a handler may read or drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    Health,
    Mana,
    Endurance,
}

/// Generic handler state carried through a save/restore cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RestoreVars(pub [i32; 6]);

impl RestoreVars {
    pub fn get(&self, index: usize) -> i32 {
        self.0.get(index).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_u64_roundtrip() {
        let id = EntityId::new(42, 7);
        assert_eq!(id, EntityId::from_u64(id.to_u64()));
        assert_eq!(id.to_string(), "E(42v7)");
    }

    #[test]
    fn spec_line_outranks_base_line() {
        assert!(SourceTier::SpecLine > SourceTier::BaseLine);
    }

    #[test]
    fn restore_vars_out_of_range_reads_zero() {
        let vars = RestoreVars([1, 2, 3, 4, 5, 6]);
        assert_eq!(vars.get(1), 2);
        assert_eq!(vars.get(9), 0);
    }
}
