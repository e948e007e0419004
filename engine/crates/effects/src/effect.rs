//! The effect state machine.
//!
//! Lock order: an owner's [`EffectList`](crate::EffectList) lock may be held
//! while an effect lock is taken, never the reverse. Effect code releases its
//! own lock before calling into a list, a ledger or a handler. The one nested
//! effect lock is an overwrite target taking its armed replacement's lock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use scheduler::{RegionScheduler, RegionTimer, TimerCallback};

use crate::error::{EffectError, HandlerResult};
use crate::handler::EffectHandler;
use crate::living::{EffectUpdate, Living};
use crate::resolver::EffectProfile;
use crate::types::{EffectId, RestoreVars, SpellId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectState {
    /// Constructed, never started.
    Armed,
    /// In the owner's list and ticking, handler not applied.
    ActiveDisabled,
    /// In the owner's list, handler applied.
    ActiveEnabled,
    /// Expired but kept in the list as an immunity marker.
    ExpiredImmune,
    /// Terminal.
    Removed,
}

/// Why a player-initiated cancel was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Harmful,
    ImmunityWindow,
}

impl DenyReason {
    pub fn message(&self, spell_name: &str) -> String {
        match self {
            DenyReason::Harmful => format!("You can't remove {spell_name}!"),
            DenyReason::ImmunityWindow => format!("You are still immune to {spell_name}."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Removed,
    /// Expired into an immunity window; still listed.
    Immune,
    Denied(DenyReason),
    /// Nothing to do in the current state.
    Ignored,
}

enum TickAction {
    Pulse,
    Expire,
    Idle,
}

struct EffectInner {
    handler: Arc<dyn EffectHandler>,
    owner: Option<Weak<dyn Living>>,
    state: EffectState,
    expired: bool,
    fading: bool,
    duration_ms: u32,
    pulse_ms: u32,
    effectiveness: f64,
    region: Option<RegionScheduler>,
    timer: Option<RegionTimer>,
    /// Region time the current duration counts from.
    started_at_ms: u64,
    /// Offset from `started_at_ms` reached when the pending fire happens.
    elapsed_at_fire: u64,
    /// Immunity reported by a disable, used by the next cancel.
    pending_immunity_ms: u32,
    restored: Option<RestoreVars>,
    funded_by: Option<Weak<dyn Living>>,
}

impl EffectInner {
    fn describe(&self, id: EffectId) -> String {
        format!("{}{}", self.handler.spell().name, id)
    }

    fn is_active(&self) -> bool {
        matches!(self.state, EffectState::ActiveEnabled | EffectState::ActiveDisabled)
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }
}

/// A live instance of a spell on one owner.
pub struct Effect {
    self_ref: Weak<Effect>,
    id: AtomicU16,
    inner: Mutex<EffectInner>,
}

impl Effect {
    pub fn new(
        handler: Arc<dyn EffectHandler>,
        duration_ms: u32,
        pulse_ms: u32,
        effectiveness: f64,
    ) -> Arc<Self> {
        Self::build(handler, duration_ms, pulse_ms, effectiveness, None)
    }

    /// Effect with the duration and pulse of the handler's spell.
    pub fn from_spell(handler: Arc<dyn EffectHandler>, effectiveness: f64) -> Arc<Self> {
        let (duration_ms, pulse_ms) = {
            let spell = handler.spell();
            (spell.duration_ms, spell.pulse_ms)
        };
        Self::new(handler, duration_ms, pulse_ms, effectiveness)
    }

    /// Effect rebuilt from persisted state, counting down `remaining_ms`.
    pub fn restored(handler: Arc<dyn EffectHandler>, remaining_ms: u32, vars: RestoreVars) -> Arc<Self> {
        let pulse_ms = handler.spell().pulse_ms;
        Self::build(handler, remaining_ms, pulse_ms, 1.0, Some(vars))
    }

    fn build(
        handler: Arc<dyn EffectHandler>,
        duration_ms: u32,
        pulse_ms: u32,
        effectiveness: f64,
        restored: Option<RestoreVars>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            self_ref: me.clone(),
            id: AtomicU16::new(0),
            inner: Mutex::new(EffectInner {
                handler,
                owner: None,
                state: EffectState::Armed,
                expired: true,
                fading: false,
                duration_ms,
                pulse_ms,
                effectiveness,
                region: None,
                timer: None,
                started_at_ms: 0,
                elapsed_at_fire: 0,
                pending_immunity_ms: 0,
                restored,
                funded_by: None,
            }),
        })
    }

    // ---- accessors ----

    pub fn id(&self) -> EffectId {
        EffectId(self.id.load(Ordering::Relaxed))
    }

    pub(crate) fn set_id(&self, id: EffectId) {
        self.id.store(id.0, Ordering::Relaxed);
    }

    pub fn state(&self) -> EffectState {
        self.inner.lock().state
    }

    pub fn handler(&self) -> Arc<dyn EffectHandler> {
        self.inner.lock().handler.clone()
    }

    pub fn owner(&self) -> Option<Arc<dyn Living>> {
        self.inner.lock().owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn name(&self) -> String {
        self.inner.lock().handler.spell().name.clone()
    }

    pub fn spell_id(&self) -> SpellId {
        self.inner.lock().handler.spell().id
    }

    pub fn concentration(&self) -> u8 {
        self.inner.lock().handler.spell().concentration
    }

    pub fn is_family(&self, family: &str) -> bool {
        self.inner.lock().handler.spell().family == family
    }

    pub fn duration_ms(&self) -> u32 {
        self.inner.lock().duration_ms
    }

    pub fn pulse_ms(&self) -> u32 {
        self.inner.lock().pulse_ms
    }

    pub fn effectiveness(&self) -> f64 {
        self.inner.lock().effectiveness
    }

    pub fn is_expired(&self) -> bool {
        let inner = self.inner.lock();
        inner.expired || !inner.is_active()
    }

    /// Expiring or removed, but possibly still listed for a moment.
    pub(crate) fn is_ending(&self) -> bool {
        let inner = self.inner.lock();
        inner.expired && inner.state != EffectState::ExpiredImmune
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.lock().state == EffectState::ActiveDisabled
    }

    pub fn is_immune(&self) -> bool {
        self.inner.lock().state == EffectState::ExpiredImmune
    }

    pub fn is_restored(&self) -> bool {
        self.inner.lock().restored.is_some()
    }

    pub fn is_fading(&self) -> bool {
        self.inner.lock().fading
    }

    /// Mark the effect as fading regardless of remaining time, e.g. an aura
    /// whose caster walked out of range. Clients are told when it changes.
    pub fn set_fading(&self, fading: bool) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.fading != fading && inner.is_active();
            inner.fading = fading;
            changed
        };
        if changed {
            self.notify_changed();
        }
    }

    /// Milliseconds left of the current duration (or immunity window).
    /// Always 0 for unlimited effects.
    pub fn remaining_ms(&self) -> u64 {
        Self::remaining_locked(&self.inner.lock())
    }

    fn remaining_locked(inner: &EffectInner) -> u64 {
        let counting = inner.is_active() || inner.state == EffectState::ExpiredImmune;
        if inner.duration_ms == 0 || !counting {
            return 0;
        }
        let Some(region) = &inner.region else {
            return 0;
        };
        let elapsed = region.now_ms().saturating_sub(inner.started_at_ms);
        (inner.duration_ms as u64).saturating_sub(elapsed)
    }

    /// Snapshot used by the stacking resolver.
    pub fn profile(&self) -> EffectProfile {
        let inner = self.inner.lock();
        let spell = inner.handler.spell();
        EffectProfile {
            family: spell.family.clone(),
            group: spell.group,
            value: spell.value * inner.effectiveness,
            damage: spell.damage * inner.effectiveness,
            tier: spell.tier,
            concentration: spell.is_concentration(),
            immune: inner.state == EffectState::ExpiredImmune,
            duration_ms: inner.duration_ms,
            remaining_ms: Self::remaining_locked(&inner),
        }
    }

    /// Client-facing view of this effect.
    pub fn view(&self) -> EffectUpdate {
        let inner = self.inner.lock();
        let spell = inner.handler.spell();
        EffectUpdate {
            id: self.id(),
            spell_id: spell.id,
            name: spell.name.clone(),
            icon: spell.icon,
            remaining_ms: Self::remaining_locked(&inner),
            immune: inner.state == EffectState::ExpiredImmune,
            fading: inner.fading,
            removed: inner.state == EffectState::Removed,
        }
    }

    /// Handler state to persist, if this effect survives a session boundary.
    pub fn restore_vars(&self) -> Option<RestoreVars> {
        let (handler, restored) = {
            let inner = self.inner.lock();
            (inner.handler.clone(), inner.restored)
        };
        restored.or_else(|| handler.restore_vars(self))
    }

    // ---- lifecycle ----

    /// Attach to `owner` and apply the handler.
    pub fn start(&self, owner: &Arc<dyn Living>) -> Result<(), EffectError> {
        self.start_with(owner, true)
    }

    /// Attach to `owner` with timers running but the handler not applied.
    pub fn start_disabled(&self, owner: &Arc<dyn Living>) -> Result<(), EffectError> {
        self.start_with(owner, false)
    }

    fn start_with(&self, owner: &Arc<dyn Living>, enable: bool) -> Result<(), EffectError> {
        let Some(me) = self.self_ref.upgrade() else {
            return Err(EffectError::OwnerGone);
        };
        {
            let mut inner = self.inner.lock();
            if inner.state != EffectState::Armed {
                let err = EffectError::NotArmed {
                    effect: inner.describe(self.id()),
                    state: inner.state,
                };
                tracing::error!(error = %err, "effect lifecycle contract violated");
                return Err(err);
            }
            inner.state = EffectState::ActiveDisabled;
            inner.expired = false;
            inner.owner = Some(Arc::downgrade(owner));
            inner.region = Some(owner.region().clone());
        }

        let list = owner.effects();
        let _batch = list.batch();
        if !list.add(&me) {
            tracing::warn!(
                owner = %owner.name(),
                effect = %self,
                "effect was not added to the effects list, not starting it"
            );
            let err = EffectError::Rejected {
                owner: owner.name().to_string(),
                effect: self.to_string(),
            };
            self.reset_to_armed();
            return Err(err);
        }

        let handler = self.handler();
        if handler.spell().is_concentration() {
            if let Some(caster) = handler.caster() {
                if !caster.concentration().add(&me) {
                    list.remove(&me);
                    self.reset_to_armed();
                    return Err(EffectError::ConcentrationFull {
                        caster: caster.name().to_string(),
                    });
                }
                self.inner.lock().funded_by = Some(Arc::downgrade(&caster));
            }
        }

        {
            let mut inner = self.inner.lock();
            if inner.state != EffectState::ActiveDisabled {
                // cancelled while attaching
                return Ok(());
            }
            self.start_timers(&mut inner);
        }
        tracing::debug!(owner = %owner.name(), effect = %self, enable, "effect started");

        if enable {
            self.enable_effect();
        }
        Ok(())
    }

    fn reset_to_armed(&self) {
        let mut inner = self.inner.lock();
        inner.state = EffectState::Armed;
        inner.expired = true;
        inner.owner = None;
        inner.region = None;
        inner.funded_by = None;
        self.set_id(EffectId(0));
    }

    /// Apply the handler to the owner. No-op unless active and disabled.
    pub fn enable_effect(&self) {
        let (handler, restored, pulsing) = {
            let mut inner = self.inner.lock();
            match inner.state {
                EffectState::ActiveDisabled if !inner.expired => {}
                EffectState::ActiveEnabled => return,
                state => {
                    tracing::warn!(effect = %inner.describe(self.id()), ?state, "enable on inactive effect ignored");
                    return;
                }
            }
            inner.state = EffectState::ActiveEnabled;
            (inner.handler.clone(), inner.restored, inner.pulse_ms > 0)
        };

        let started = match restored {
            Some(vars) => self.guarded("on_restore_start", || handler.on_restore_start(self, &vars)),
            None => self.guarded("on_start", || handler.on_start(self)),
        };
        if started.is_none() {
            return;
        }
        if pulsing && self.state() == EffectState::ActiveEnabled {
            self.guarded("on_pulse", || handler.on_pulse(self));
        }
        self.notify_changed();
    }

    /// Withdraw the handler while keeping the effect listed and ticking.
    pub fn disable_effect(&self, silent: bool) {
        if let Some(immunity_ms) = self.disable(silent) {
            self.inner.lock().pending_immunity_ms = immunity_ms;
            self.notify_changed();
        }
    }

    /// `ActiveEnabled -> ActiveDisabled`. `None` when not enabled or the handler failed.
    fn disable(&self, silent: bool) -> Option<u32> {
        let (handler, restored) = {
            let mut inner = self.inner.lock();
            if inner.state != EffectState::ActiveEnabled {
                return None;
            }
            inner.state = EffectState::ActiveDisabled;
            (inner.handler.clone(), inner.restored)
        };
        match restored {
            Some(vars) => self.guarded("on_restore_expire", || {
                handler.on_restore_expire(self, &vars, silent)
            }),
            None => self.guarded("on_expire", || handler.on_expire(self, silent)),
        }
    }

    /// End the effect. Player-initiated cancels are refused for harmful
    /// effects and for immunity windows of a living owner.
    pub fn cancel(&self, player_initiated: bool) -> CancelOutcome {
        self.cancel_with(player_initiated, false)
    }

    /// Cancel that also clears an immunity window.
    pub fn force_cancel(&self) -> CancelOutcome {
        self.cancel_with(false, true)
    }

    fn cancel_with(&self, player_initiated: bool, force: bool) -> CancelOutcome {
        let owner = self.owner();
        let _batch = owner.as_ref().map(|o| o.effects().batch());
        let (state, expired, handler) = {
            let inner = self.inner.lock();
            (inner.state, inner.expired, inner.handler.clone())
        };
        let owner_alive = owner.as_ref().is_some_and(|o| o.is_alive());

        if player_initiated {
            let denied = if !handler.has_positive_effect() {
                Some(DenyReason::Harmful)
            } else if state == EffectState::ExpiredImmune && owner_alive {
                Some(DenyReason::ImmunityWindow)
            } else {
                None
            };
            if let Some(reason) = denied {
                if let Some(owner) = &owner {
                    owner.message(reason.message(&handler.spell().name));
                }
                tracing::debug!(effect = %self, ?reason, "player cancel denied");
                return CancelOutcome::Denied(reason);
            }
        }

        match state {
            EffectState::ActiveEnabled | EffectState::ActiveDisabled if !expired => {
                self.expire(owner.as_ref())
            }
            EffectState::ExpiredImmune if force || !owner_alive => {
                self.remove_effect();
                CancelOutcome::Removed
            }
            _ => CancelOutcome::Ignored,
        }
    }

    fn expire(&self, owner: Option<&Arc<dyn Living>>) -> CancelOutcome {
        let (was_enabled, cached_immunity) = {
            let mut inner = self.inner.lock();
            if inner.expired || !inner.is_active() {
                return CancelOutcome::Ignored;
            }
            inner.expired = true;
            inner.stop_timer();
            (inner.state == EffectState::ActiveEnabled, inner.pending_immunity_ms)
        };

        let reported = if was_enabled { self.disable(false) } else { None };
        let immunity_ms = reported.unwrap_or(cached_immunity);
        if self.state() == EffectState::Removed {
            return CancelOutcome::Removed;
        }

        let listed = match (owner, self.self_ref.upgrade()) {
            (Some(owner), Some(me)) => owner.effects().contains(&me),
            _ => false,
        };
        if immunity_ms > 0 && listed {
            {
                let mut inner = self.inner.lock();
                if inner.state == EffectState::Removed {
                    return CancelOutcome::Removed;
                }
                inner.state = EffectState::ExpiredImmune;
                inner.pending_immunity_ms = 0;
                self.start_immunity_timer(&mut inner, immunity_ms);
            }
            tracing::debug!(effect = %self, immunity_ms, "effect expired into immunity");
            self.notify_changed();
            return CancelOutcome::Immune;
        }

        self.remove_effect();
        CancelOutcome::Removed
    }

    /// Replace this effect's spell with `replacement`'s, in place.
    ///
    /// The replacement must be armed and is spent only when the overwrite
    /// lands; on any error it is left armed. Concentration effects on either
    /// side are refused.
    pub fn overwrite(&self, replacement: &Arc<Effect>) -> Result<(), EffectError> {
        self.overwrite_with(replacement, true)
    }

    /// Overwrite, leaving the new handler disabled.
    pub fn overwrite_disabled(&self, replacement: &Arc<Effect>) -> Result<(), EffectError> {
        self.overwrite_with(replacement, false)
    }

    fn overwrite_with(&self, replacement: &Arc<Effect>, enable: bool) -> Result<(), EffectError> {
        let Some(me) = self.self_ref.upgrade() else {
            return Err(EffectError::OwnerGone);
        };
        if Arc::ptr_eq(&me, replacement) {
            return Err(EffectError::NotArmed {
                effect: self.to_string(),
                state: self.state(),
            });
        }
        let (handler, duration_ms, pulse_ms, effectiveness) = replacement.armed_parts()?;
        let funded = {
            let inner = self.inner.lock();
            inner.handler.spell().is_concentration()
        };
        if funded || handler.spell().is_concentration() {
            let err = EffectError::ConcentrationOverwrite {
                effect: if funded { self.to_string() } else { replacement.to_string() },
            };
            tracing::warn!(error = %err, "overwrite refused");
            return Err(err);
        }
        let owner = self.owner().ok_or(EffectError::OwnerGone)?;

        let _batch = owner.effects().batch();
        // Claim: once `expired` is set and the timer is gone, natural expiry
        // and plain cancels leave this effect alone.
        let (old_handler, was_enabled, restored) = {
            let mut inner = self.inner.lock();
            let claimable = (inner.is_active() && !inner.expired)
                || inner.state == EffectState::ExpiredImmune;
            if !claimable {
                return Err(EffectError::NotActive {
                    effect: inner.describe(self.id()),
                    state: inner.state,
                });
            }
            inner.stop_timer();
            let was_enabled = inner.state == EffectState::ActiveEnabled;
            inner.expired = true;
            (inner.handler.clone(), was_enabled, inner.restored)
        };

        if was_enabled {
            let expired = match restored {
                Some(vars) => self.guarded("on_restore_expire", || {
                    old_handler.on_restore_expire(self, &vars, true)
                }),
                None => self.guarded("on_expire", || old_handler.on_expire(self, true)),
            };
            if expired.is_none() {
                return Err(self.not_active());
            }
        }
        if self.guarded("on_remove", || old_handler.on_remove(self, true)).is_none() {
            return Err(self.not_active());
        }

        let spent = {
            let mut inner = self.inner.lock();
            if inner.state == EffectState::Removed {
                return Err(EffectError::NotActive {
                    effect: inner.describe(self.id()),
                    state: inner.state,
                });
            }
            let spent = replacement.spend();
            if spent.is_ok() {
                inner.handler = handler;
                inner.duration_ms = duration_ms;
                inner.pulse_ms = pulse_ms;
                inner.effectiveness = effectiveness;
                inner.restored = None;
                inner.pending_immunity_ms = 0;
                inner.expired = false;
                inner.fading = false;
                inner.state = EffectState::ActiveDisabled;
                self.start_timers(&mut inner);
            }
            spent
        };
        if let Err(err) = spent {
            // the old handler is already withdrawn
            tracing::warn!(effect = %self, error = %err, "replacement was started elsewhere, removing effect");
            self.fault();
            return Err(err);
        }
        tracing::debug!(owner = %owner.name(), effect = %self, "effect overwritten");

        if enable {
            self.enable_effect();
        } else {
            self.notify_changed();
        }
        Ok(())
    }

    /// Parameters of an armed effect, read without spending it.
    fn armed_parts(&self) -> Result<(Arc<dyn EffectHandler>, u32, u32, f64), EffectError> {
        let inner = self.inner.lock();
        if inner.state != EffectState::Armed {
            return Err(EffectError::NotArmed {
                effect: inner.describe(self.id()),
                state: inner.state,
            });
        }
        Ok((
            inner.handler.clone(),
            inner.duration_ms,
            inner.pulse_ms,
            inner.effectiveness,
        ))
    }

    /// `Armed -> Removed` for a replacement whose spell was taken over.
    fn spend(&self) -> Result<(), EffectError> {
        let mut inner = self.inner.lock();
        if inner.state != EffectState::Armed {
            return Err(EffectError::NotArmed {
                effect: inner.describe(self.id()),
                state: inner.state,
            });
        }
        inner.state = EffectState::Removed;
        Ok(())
    }

    fn not_active(&self) -> EffectError {
        let inner = self.inner.lock();
        EffectError::NotActive {
            effect: inner.describe(self.id()),
            state: inner.state,
        }
    }

    /// Tell the owner's list this effect's client view changed.
    pub fn notify_changed(&self) {
        if let (Some(owner), Some(me)) = (self.owner(), self.self_ref.upgrade()) {
            owner.effects().on_effects_changed(&me);
        }
    }

    // ---- timers ----

    fn start_timers(&self, inner: &mut EffectInner) {
        inner.stop_timer();
        let Some(region) = inner.region.clone() else {
            return;
        };
        inner.started_at_ms = region.now_ms();
        inner.elapsed_at_fire = 0;

        let first_ms = match (inner.pulse_ms, inner.duration_ms) {
            (0, 0) => return,
            (0, duration) => duration,
            (pulse, 0) => pulse,
            (pulse, duration) => pulse.min(duration),
        };
        let callback: Weak<dyn TimerCallback> = self.self_ref.clone();
        let timer = region.create_timer(callback);
        timer.set_interval(inner.pulse_ms);
        timer.start(first_ms);
        inner.elapsed_at_fire = first_ms as u64;
        inner.timer = Some(timer);
    }

    fn start_immunity_timer(&self, inner: &mut EffectInner, immunity_ms: u32) {
        inner.stop_timer();
        inner.duration_ms = immunity_ms;
        let Some(region) = inner.region.clone() else {
            return;
        };
        inner.started_at_ms = region.now_ms();
        let callback: Weak<dyn TimerCallback> = self.self_ref.clone();
        let timer = region.create_timer(callback);
        timer.start(immunity_ms);
        inner.elapsed_at_fire = immunity_ms as u64;
        inner.timer = Some(timer);
    }

    fn pulse_callback(&self) {
        let handler = {
            let inner = self.inner.lock();
            if inner.state != EffectState::ActiveEnabled {
                return;
            }
            inner.handler.clone()
        };
        self.guarded("on_pulse", || handler.on_pulse(self));
    }

    fn expired_callback(&self) {
        if self.state() == EffectState::ExpiredImmune {
            self.remove_effect();
        } else {
            self.cancel(false);
        }
    }

    // ---- removal ----

    fn remove_effect(&self) {
        let Some((handler, owner, funded_by)) = self.mark_removed() else {
            return;
        };
        self.detach(owner, funded_by);
        tracing::debug!(effect = %self, "effect removed");
        self.guarded("on_remove", || handler.on_remove(self, false));
    }

    #[allow(clippy::type_complexity)]
    fn mark_removed(
        &self,
    ) -> Option<(Arc<dyn EffectHandler>, Option<Weak<dyn Living>>, Option<Weak<dyn Living>>)> {
        let mut inner = self.inner.lock();
        if inner.state == EffectState::Removed {
            return None;
        }
        inner.state = EffectState::Removed;
        inner.expired = true;
        inner.stop_timer();
        Some((inner.handler.clone(), inner.owner.clone(), inner.funded_by.take()))
    }

    fn detach(&self, owner: Option<Weak<dyn Living>>, funded_by: Option<Weak<dyn Living>>) {
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        if let Some(owner) = owner.and_then(|w| w.upgrade()) {
            owner.effects().remove(&me);
        }
        if let Some(caster) = funded_by.and_then(|w| w.upgrade()) {
            caster.concentration().remove(&me);
        }
    }

    /// Force to `Removed` without calling the handler again.
    fn fault(&self) {
        if let Some((_, owner, funded_by)) = self.mark_removed() {
            self.detach(owner, funded_by);
        }
    }

    fn guarded<T>(&self, callback: &'static str, f: impl FnOnce() -> HandlerResult<T>) -> Option<T> {
        let error = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        tracing::error!(effect = %self, callback, %error, "effect handler failed, removing effect");
        let region = self.inner.lock().region.clone();
        if let Some(region) = region {
            region.report_fault();
        }
        self.fault();
        None
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl TimerCallback for Effect {
    fn on_tick(&self, timer: &RegionTimer) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.timer.as_ref().map(RegionTimer::id) != Some(timer.id()) {
                return;
            }
            match inner.state {
                EffectState::ExpiredImmune => {
                    timer.stop();
                    TickAction::Expire
                }
                EffectState::ActiveEnabled | EffectState::ActiveDisabled if !inner.expired => {
                    let duration = inner.duration_ms as u64;
                    let funded = inner.handler.spell().is_concentration();
                    if duration == 0 || funded || inner.elapsed_at_fire < duration {
                        let mut next = inner.elapsed_at_fire + timer.interval() as u64;
                        if duration > 0 && !funded && next > duration {
                            // shorten the last interval so expiry lands on the duration
                            timer.set_interval((duration - inner.elapsed_at_fire) as u32);
                            next = duration;
                        }
                        inner.elapsed_at_fire = next;
                        if inner.state == EffectState::ActiveEnabled {
                            TickAction::Pulse
                        } else {
                            TickAction::Idle
                        }
                    } else {
                        timer.stop();
                        TickAction::Expire
                    }
                }
                _ => {
                    timer.stop();
                    TickAction::Idle
                }
            }
        };
        match action {
            TickAction::Pulse => self.pulse_callback(),
            TickAction::Expire => self.expired_callback(),
            TickAction::Idle => {}
        }
    }

    fn on_fault(&self, _timer: &RegionTimer) {
        tracing::error!(effect = %self, "effect timer faulted, removing effect");
        self.fault();
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        write!(f, "{} [{:?}]", inner.describe(self.id()), inner.state)
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("spell", &inner.handler.spell().name)
            .field("state", &inner.state)
            .field("duration_ms", &inner.duration_ms)
            .field("pulse_ms", &inner.pulse_ms)
            .field("effectiveness", &inner.effectiveness)
            .finish()
    }
}
