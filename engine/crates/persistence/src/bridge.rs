use std::sync::Arc;

use effects::{Effect, EffectConfig, Living, SpellResolver};

use crate::error::PersistenceError;
use crate::record::RestorableEffectRecord;
use crate::store::EffectStore;

/// Outcome of one [`PersistenceBridge::restore_session`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub discarded: usize,
}

/// Moves restorable effects between a living and a store at session
/// boundaries. Never called from the region tick.
pub struct PersistenceBridge<S: EffectStore> {
    store: S,
    resolver: Arc<dyn SpellResolver>,
    min_restore_ms: u32,
}

impl<S: EffectStore> PersistenceBridge<S> {
    pub fn new(store: S, resolver: Arc<dyn SpellResolver>, config: &EffectConfig) -> Self {
        Self {
            store,
            resolver,
            min_restore_ms: config.min_restore_ms,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records for every effect of `owner` worth carrying into the next session.
    pub fn capture(&self, owner: &Arc<dyn Living>) -> Vec<RestorableEffectRecord> {
        let mut records = Vec::new();
        for effect in owner.effects().snapshot() {
            if effect.is_expired() {
                continue;
            }
            let Some(vars) = effect.restore_vars() else {
                continue;
            };
            let remaining_ms = effect.remaining_ms();
            if remaining_ms <= self.min_restore_ms as u64 {
                continue;
            }
            let handler = effect.handler();
            if handler.spell().is_concentration() {
                let funded_by_other = handler.caster().map(|c| c.id() != owner.id()).unwrap_or(true);
                if funded_by_other {
                    continue;
                }
            }
            records.push(RestorableEffectRecord {
                key: records.len() as u32,
                spell_id: handler.spell().id,
                line: handler.spell().line.clone(),
                remaining_ms: remaining_ms.min(u32::MAX as u64) as u32,
                vars,
            });
        }
        records
    }

    /// Replace the stored records of `owner_key` with the owner's current
    /// restorable effects. Returns the number saved.
    pub fn save_session(&self, owner_key: &str, owner: &Arc<dyn Living>) -> Result<usize, PersistenceError> {
        let records = self.capture(owner);
        self.store.delete_all(owner_key)?;
        for record in &records {
            self.store.save_record(owner_key, record)?;
        }
        tracing::info!(owner = owner_key, saved = records.len(), "effects saved at session end");
        Ok(records.len())
    }

    /// Recreate the stored effects of `owner_key` on `owner`. Records are
    /// consumed; ones the store cannot read or whose spell no longer resolves
    /// are dropped and counted as discarded.
    pub fn restore_session(
        &self,
        owner_key: &str,
        owner: &Arc<dyn Living>,
    ) -> Result<RestoreReport, PersistenceError> {
        let loaded = self.store.load_records(owner_key)?;
        self.store.delete_all(owner_key)?;

        let mut report = RestoreReport {
            restored: 0,
            discarded: loaded.unreadable,
        };
        let _batch = owner.effects().batch();
        for record in loaded.records {
            let Some(handler) = self
                .resolver
                .resolve(record.spell_id, &record.line, Some(Arc::downgrade(owner)))
            else {
                tracing::debug!(
                    owner = owner_key,
                    spell = %record.spell_id,
                    line = %record.line,
                    "discarding effect record with unknown spell"
                );
                report.discarded += 1;
                continue;
            };

            let effect = Effect::restored(handler, record.remaining_ms, record.vars);
            if let Err(err) = effect.start_disabled(owner) {
                tracing::warn!(owner = owner_key, error = %err, "restored effect refused");
                report.discarded += 1;
                continue;
            }
            effect.enable_effect();
            report.restored += 1;
        }

        tracing::info!(
            owner = owner_key,
            restored = report.restored,
            discarded = report.discarded,
            "effects restored at session start"
        );
        Ok(report)
    }
}
