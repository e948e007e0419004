use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use tracing::warn;

use crate::effect::Effect;
use crate::error::CatalogError;
use crate::handler::EffectHandler;
use crate::handlers;
use crate::living::Living;
use crate::spell::Spell;
use crate::types::SpellId;

/// Rebuilds handlers for persisted effects.
pub trait SpellResolver: Send + Sync {
    /// `None` when the spell no longer exists or moved to another line.
    fn resolve(
        &self,
        spell_id: SpellId,
        line: &str,
        caster: Option<Weak<dyn Living>>,
    ) -> Option<Arc<dyn EffectHandler>>;
}

/// Spell definitions loaded from JSON content.
#[derive(Debug, Default)]
pub struct SpellCatalog {
    spells: BTreeMap<SpellId, Arc<Spell>>,
}

impl SpellCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spell: Spell) -> Result<(), CatalogError> {
        if self.spells.contains_key(&spell.id) {
            return Err(CatalogError::Duplicate(spell.id));
        }
        self.spells.insert(spell.id, Arc::new(spell));
        Ok(())
    }

    pub fn get(&self, id: SpellId) -> Option<Arc<Spell>> {
        self.spells.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.spells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Spell>> {
        self.spells.values()
    }

    /// Parse a JSON array of spells.
    pub fn from_json_str(file: &str, json: &str) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        catalog.load_array(file, json)?;
        Ok(catalog)
    }

    /// Load every top-level `*.json` file of a directory, each a JSON array
    /// of spells, in file name order.
    pub fn load_dir(path: &Path) -> Result<Self, CatalogError> {
        if !path.is_dir() {
            return Err(CatalogError::NotADirectory(path.display().to_string()));
        }

        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        if entries.is_empty() {
            warn!("Spell directory is empty: {}", path.display());
        }

        let mut catalog = Self::new();
        for entry in entries {
            let file_path = entry.path();
            let file_name = file_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
            let content = std::fs::read_to_string(&file_path)?;
            catalog.load_array(&file_name, &content)?;
        }

        tracing::info!(spells = catalog.len(), dir = %path.display(), "spell catalog loaded");
        Ok(catalog)
    }

    fn load_array(&mut self, file: &str, json: &str) -> Result<(), CatalogError> {
        let spells: Vec<Spell> = serde_json::from_str(json).map_err(|e| CatalogError::Parse {
            file: file.to_string(),
            message: e.to_string(),
        })?;
        for spell in spells {
            self.insert(spell)?;
        }
        Ok(())
    }

    pub fn create_handler(
        &self,
        id: SpellId,
        caster: Option<Weak<dyn Living>>,
    ) -> Option<Arc<dyn EffectHandler>> {
        self.get(id).map(|spell| handlers::build(spell, caster))
    }

    /// Armed effect of spell `id` cast by `caster`.
    pub fn cast(&self, id: SpellId, caster: &Arc<dyn Living>, effectiveness: f64) -> Option<Arc<Effect>> {
        let handler = self.create_handler(id, Some(Arc::downgrade(caster)))?;
        Some(Effect::from_spell(handler, effectiveness))
    }
}

impl SpellResolver for SpellCatalog {
    fn resolve(
        &self,
        spell_id: SpellId,
        line: &str,
        caster: Option<Weak<dyn Living>>,
    ) -> Option<Arc<dyn EffectHandler>> {
        let spell = self.get(spell_id)?;
        if spell.line != line {
            tracing::debug!(%spell_id, stored = line, current = %spell.line, "spell changed line");
            return None;
        }
        Some(handlers::build(spell, caster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPELLS: &str = r#"[
        {"id": 1, "name": "Strength", "kind": "stat_buff", "family": "strength", "value": 10.0,
         "duration_ms": 60000, "positive": true, "line": "enhancements"},
        {"id": 2, "name": "Venom", "kind": "damage_over_time", "family": "poison", "damage": 4.0,
         "duration_ms": 20000, "pulse_ms": 4000, "line": "venoms"}
    ]"#;

    #[test]
    fn parse_array() {
        let catalog = SpellCatalog::from_json_str("spells.json", SPELLS).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(SpellId(2)).unwrap().pulse_ms, 4000);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let json = r#"[
            {"id": 1, "name": "A", "kind": "stat_buff", "family": "a"},
            {"id": 1, "name": "B", "kind": "stat_buff", "family": "b"}
        ]"#;
        let err = SpellCatalog::from_json_str("dup.json", json).unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate(SpellId(1))));
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = SpellCatalog::from_json_str("broken.json", "{").unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn load_dir_reads_json_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("base.json")).unwrap();
        f.write_all(SPELLS.as_bytes()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = SpellCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn load_dir_rejects_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = SpellCatalog::load_dir(file.path()).unwrap_err();
        assert!(matches!(err, CatalogError::NotADirectory(_)));
    }

    #[test]
    fn resolver_checks_line() {
        let catalog = SpellCatalog::from_json_str("spells.json", SPELLS).unwrap();
        assert!(catalog.resolve(SpellId(1), "enhancements", None).is_some());
        assert!(catalog.resolve(SpellId(1), "venoms", None).is_none());
        assert!(catalog.resolve(SpellId(9), "enhancements", None).is_none());
    }
}
