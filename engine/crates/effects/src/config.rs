use serde::Deserialize;

/// Tunables of the effect engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Effects with less remaining time than this are not persisted.
    pub min_restore_ms: u32,
    /// Turn an unmatched `commit_changes` into a panic instead of a clamped log.
    pub strict_batches: bool,
    /// Maximum number of effects one caster may fund with concentration.
    pub concentration_capacity: usize,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            min_restore_ms: 5_000,
            strict_batches: false,
            concentration_capacity: 20,
        }
    }
}

impl EffectConfig {
    /// Configuration for tests: strict batch accounting.
    pub fn strict() -> Self {
        Self {
            strict_batches: true,
            ..Self::default()
        }
    }
}
