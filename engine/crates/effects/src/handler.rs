use std::sync::Arc;

use crate::effect::Effect;
use crate::error::HandlerResult;
use crate::living::Living;
use crate::spell::Spell;
use crate::types::RestoreVars;

/// Spell-specific behaviour attached to an [`Effect`].
///
/// Handlers are invoked on the owner's region thread, never while the effect
/// holds its own lock, so a handler may call back into the effect (for
/// example `effect.cancel(false)` from `on_pulse`). Returning an error or
/// panicking removes the effect without further callbacks.
pub trait EffectHandler: Send + Sync {
    fn spell(&self) -> &Spell;

    /// The living funding or casting this effect, if still around.
    fn caster(&self) -> Option<Arc<dyn Living>> {
        None
    }

    fn on_start(&self, effect: &Effect) -> HandlerResult<()>;

    /// Periodic work. The default cancels effects whose owner died.
    fn on_pulse(&self, effect: &Effect) -> HandlerResult<()> {
        if let Some(owner) = effect.owner() {
            if !owner.is_alive() {
                effect.cancel(false);
            }
        }
        Ok(())
    }

    /// Undo `on_start`. Returns the immunity window in ms, 0 for none.
    fn on_expire(&self, effect: &Effect, silent: bool) -> HandlerResult<u32>;

    /// Final notification. `was_replaced` is set when an overwrite swaps
    /// this handler out of a still-active effect.
    fn on_remove(&self, _effect: &Effect, _was_replaced: bool) -> HandlerResult<()> {
        Ok(())
    }

    /// Re-apply a persisted effect without first-cast side effects.
    fn on_restore_start(&self, effect: &Effect, _vars: &RestoreVars) -> HandlerResult<()> {
        self.on_start(effect)
    }

    fn on_restore_expire(&self, effect: &Effect, _vars: &RestoreVars, silent: bool) -> HandlerResult<u32> {
        self.on_expire(effect, silent)
    }

    /// State to persist across a session boundary. `None` means not restorable.
    fn restore_vars(&self, _effect: &Effect) -> Option<RestoreVars> {
        None
    }

    fn has_positive_effect(&self) -> bool {
        self.spell().positive
    }
}
