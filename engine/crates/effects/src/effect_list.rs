use std::backtrace::Backtrace;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::effect::Effect;
use crate::living::{Living, Notice};
use crate::types::EffectId;

#[derive(Default)]
struct ListInner {
    effects: Vec<Arc<Effect>>,
    changes_in_flight: u32,
    last_id: u16,
    changed: Vec<Arc<Effect>>,
}

impl ListInner {
    fn next_free_id(&mut self) -> EffectId {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id == 0 {
                continue;
            }
            let candidate = EffectId(self.last_id);
            if !self.effects.iter().any(|e| e.id() == candidate) {
                return candidate;
            }
        }
    }

    fn mark_changed(&mut self, effect: &Arc<Effect>) {
        if !self.changed.iter().any(|e| Arc::ptr_eq(e, effect)) {
            self.changed.push(effect.clone());
        }
    }

    fn position(&self, effect: &Arc<Effect>) -> Option<usize> {
        self.effects.iter().position(|e| Arc::ptr_eq(e, effect))
    }

    /// Pending changes, if no batch is open.
    fn take_flush(&mut self) -> Option<Vec<Arc<Effect>>> {
        if self.changes_in_flight == 0 && !self.changed.is_empty() {
            Some(std::mem::take(&mut self.changed))
        } else {
            None
        }
    }
}

/// The effects carried by one living, in insertion order.
///
/// Mutations mark effects as changed; the owner is notified once per
/// outermost change batch with the client view of every changed effect.
pub struct EffectList {
    owner: Weak<dyn Living>,
    strict: bool,
    inner: Mutex<ListInner>,
    applying: ReentrantMutex<()>,
}

impl EffectList {
    /// `strict` turns an unmatched `commit_changes` into a panic.
    pub fn new(owner: Weak<dyn Living>, strict: bool) -> Self {
        Self {
            owner,
            strict,
            inner: Mutex::new(ListInner::default()),
            applying: ReentrantMutex::new(()),
        }
    }

    /// Serializes resolve-then-start sequences on this list. Separate from
    /// the list lock, so handlers may run while it is held; re-entrant for
    /// handlers that apply further effects to the same owner.
    pub fn lock_applies(&self) -> ReentrantMutexGuard<'_, ()> {
        self.applying.lock()
    }

    /// Insert an effect and assign it a free id. Refused for a dead or
    /// missing owner and for effects already present.
    pub fn add(&self, effect: &Arc<Effect>) -> bool {
        let Some(owner) = self.owner.upgrade() else {
            return false;
        };
        if !owner.is_alive() {
            tracing::debug!(owner = %owner.name(), "effect refused by dead owner");
            return false;
        }
        let flush = {
            let mut inner = self.inner.lock();
            if inner.position(effect).is_some() {
                return false;
            }
            let id = inner.next_free_id();
            effect.set_id(id);
            inner.effects.push(effect.clone());
            inner.mark_changed(effect);
            inner.take_flush()
        };
        self.deliver(&owner, flush);
        true
    }

    /// Remove an effect. Every effect after it is marked changed too, as
    /// their client slots shift.
    pub fn remove(&self, effect: &Arc<Effect>) -> bool {
        let flush = {
            let mut inner = self.inner.lock();
            let Some(pos) = inner.position(effect) else {
                return false;
            };
            let removed = inner.effects.remove(pos);
            inner.mark_changed(&removed);
            let shifted: Vec<Arc<Effect>> = inner.effects[pos..].to_vec();
            for e in &shifted {
                inner.mark_changed(e);
            }
            inner.take_flush()
        };
        if let Some(owner) = self.owner.upgrade() {
            self.deliver(&owner, flush);
        }
        true
    }

    /// Mark a member as changed. Ignored for non-members.
    pub fn on_effects_changed(&self, effect: &Arc<Effect>) {
        let flush = {
            let mut inner = self.inner.lock();
            if inner.position(effect).is_none() {
                return;
            }
            inner.mark_changed(effect);
            inner.take_flush()
        };
        if let Some(owner) = self.owner.upgrade() {
            self.deliver(&owner, flush);
        }
    }

    /// Cancel every effect (including immunity markers) as one batch.
    pub fn cancel_all(&self) {
        let _batch = self.batch();
        let drained = {
            let mut inner = self.inner.lock();
            let drained = std::mem::take(&mut inner.effects);
            for e in &drained {
                inner.mark_changed(e);
            }
            drained
        };
        tracing::debug!(count = drained.len(), "cancelling all effects");
        for effect in drained {
            effect.force_cancel();
        }
    }

    pub fn begin_changes(&self) {
        self.inner.lock().changes_in_flight += 1;
    }

    /// Close one batch level; the outermost commit delivers pending changes.
    pub fn commit_changes(&self) {
        let flush = {
            let mut inner = self.inner.lock();
            if inner.changes_in_flight == 0 {
                drop(inner);
                if self.strict {
                    panic!("commit_changes called without a matching begin_changes");
                }
                tracing::error!(
                    backtrace = %Backtrace::capture(),
                    "commit_changes called without a matching begin_changes, clamping to zero"
                );
                return;
            }
            inner.changes_in_flight -= 1;
            inner.take_flush()
        };
        if let Some(owner) = self.owner.upgrade() {
            self.deliver(&owner, flush);
        }
    }

    /// Open a batch closed when the guard drops.
    pub fn batch(&self) -> ChangeBatch<'_> {
        self.begin_changes();
        ChangeBatch { list: self }
    }

    pub fn changes_in_flight(&self) -> u32 {
        self.inner.lock().changes_in_flight
    }

    fn deliver(&self, owner: &Arc<dyn Living>, flush: Option<Vec<Arc<Effect>>>) {
        let Some(changed) = flush else {
            return;
        };
        let updates = changed.iter().map(|e| e.view()).collect();
        owner.notify(Notice::EffectsChanged(updates));
    }

    // ---- queries ----

    pub fn contains(&self, effect: &Arc<Effect>) -> bool {
        self.inner.lock().position(effect).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().effects.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<Effect>> {
        self.inner.lock().effects.clone()
    }

    pub fn get_by_id(&self, id: EffectId) -> Option<Arc<Effect>> {
        self.inner.lock().effects.iter().find(|e| e.id() == id).cloned()
    }

    /// First effect of a stacking family.
    pub fn get_of_type(&self, family: &str) -> Option<Arc<Effect>> {
        self.inner
            .lock()
            .effects
            .iter()
            .find(|e| e.is_family(family))
            .cloned()
    }

    pub fn get_all_of_type(&self, family: &str) -> Vec<Arc<Effect>> {
        self.inner
            .lock()
            .effects
            .iter()
            .filter(|e| e.is_family(family))
            .cloned()
            .collect()
    }

    /// Effects matching `pred`, evaluated outside the list lock.
    pub fn find(&self, mut pred: impl FnMut(&Effect) -> bool) -> Vec<Arc<Effect>> {
        self.snapshot().into_iter().filter(|e| pred(e)).collect()
    }

    pub fn count_of_type(&self, family: &str) -> usize {
        self.get_all_of_type(family).len()
    }
}

impl std::fmt::Debug for EffectList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EffectList")
            .field("len", &inner.effects.len())
            .field("changes_in_flight", &inner.changes_in_flight)
            .finish()
    }
}

/// RAII change batch from [`EffectList::batch`].
#[must_use = "the batch commits when dropped"]
pub struct ChangeBatch<'a> {
    list: &'a EffectList,
}

impl Drop for ChangeBatch<'_> {
    fn drop(&mut self) {
        self.list.commit_changes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectState;
    use crate::spell::{HandlerKind, Spell};
    use crate::test_support::{Fixture, RecordingHandler};

    fn effect(id: u32, family: &str) -> Arc<Effect> {
        let spell = Spell::new(id, format!("Spell {id}"), HandlerKind::StatBuff, family)
            .with_duration(30_000)
            .positive();
        Effect::from_spell(RecordingHandler::new(spell), 1.0)
    }

    #[test]
    fn ids_are_unique_and_nonzero() {
        let fx = Fixture::new();
        let a = effect(1, "a");
        let b = effect(2, "b");
        a.start(&fx.owner()).unwrap();
        b.start(&fx.owner()).unwrap();
        assert_ne!(a.id(), EffectId(0));
        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(&fx.list().get_by_id(b.id()).unwrap(), &b));
    }

    #[test]
    fn add_rejects_duplicates() {
        let fx = Fixture::new();
        let a = effect(1, "a");
        a.start(&fx.owner()).unwrap();
        assert!(!fx.list().add(&a));
        assert_eq!(fx.list().len(), 1);
    }

    #[test]
    fn queries_by_family() {
        let fx = Fixture::new();
        for (id, family) in [(1, "str"), (2, "dex"), (3, "str")] {
            effect(id, family).start(&fx.owner()).unwrap();
        }
        assert_eq!(fx.list().count_of_type("str"), 2);
        let first = fx.list().get_of_type("str").unwrap();
        assert_eq!(first.spell_id().0, 1);
        assert!(fx.list().get_of_type("con").is_none());
        assert_eq!(fx.list().find(|e| e.spell_id().0 > 1).len(), 2);
    }

    #[test]
    fn batch_coalesces_notifications() {
        let fx = Fixture::new();
        {
            let _batch = fx.list().batch();
            for id in 1..=3 {
                effect(id, "x").start(&fx.owner()).unwrap();
            }
            assert_eq!(fx.sink.change_count(), 0);
        }
        assert_eq!(fx.sink.change_count(), 1);
        assert_eq!(fx.sink.last_changes().unwrap().len(), 3);
        assert_eq!(fx.list().changes_in_flight(), 0);
    }

    #[test]
    fn unbatched_mutation_notifies_immediately() {
        let fx = Fixture::new();
        let a = effect(1, "a");
        fx.list().begin_changes();
        a.start(&fx.owner()).unwrap();
        fx.list().commit_changes();
        assert_eq!(fx.sink.change_count(), 1);

        let b = effect(2, "b");
        fx.list().add(&b);
        assert_eq!(fx.sink.change_count(), 2);
    }

    #[test]
    fn removal_marks_shifted_effects() {
        let fx = Fixture::new();
        let effects: Vec<_> = (1..=3).map(|id| effect(id, "x")).collect();
        for e in &effects {
            e.start(&fx.owner()).unwrap();
        }
        fx.sink.take();

        effects[0].cancel(false);
        let changes = fx.sink.last_changes().unwrap();
        assert_eq!(changes.len(), 3);
        assert!(changes[0].removed);
        assert!(!changes[1].removed);
    }

    #[test]
    fn cancel_all_empties_list_in_one_notification() {
        let fx = Fixture::new();
        let effects: Vec<_> = (1..=4).map(|id| effect(id, "x")).collect();
        for e in &effects {
            e.start(&fx.owner()).unwrap();
        }
        fx.sink.take();

        fx.list().cancel_all();
        assert!(fx.list().is_empty());
        assert!(effects.iter().all(|e| e.state() == EffectState::Removed));
        assert_eq!(fx.sink.change_count(), 1);
    }

    #[test]
    fn lenient_commit_clamps_at_zero() {
        let fx = Fixture::lenient();
        fx.list().commit_changes();
        assert_eq!(fx.list().changes_in_flight(), 0);
        fx.list().begin_changes();
        fx.list().commit_changes();
        assert_eq!(fx.list().changes_in_flight(), 0);
    }

    #[test]
    #[should_panic(expected = "without a matching begin_changes")]
    fn strict_commit_panics_on_underflow() {
        let fx = Fixture::new();
        fx.list().commit_changes();
    }

    #[test]
    fn dead_owner_refuses_add() {
        let fx = Fixture::new();
        fx.living.die();
        assert!(!fx.list().add(&effect(1, "a")));
    }
}
