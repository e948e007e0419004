//! Timed, pulsing, stackable status effects on living entities.
//!
//! An [`Effect`] binds a spell's [`EffectHandler`] to one owner. Its timers
//! run on the owner's region scheduler; stacking against the owner's
//! existing effects is decided by [`resolver::resolve`] through
//! [`apply_effect`].

pub mod apply;
pub mod catalog;
pub mod concentration;
pub mod config;
pub mod effect;
pub mod effect_list;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod living;
pub mod resolver;
pub mod spell;
pub mod types;

#[cfg(test)]
mod test_support;

pub use apply::{apply_effect, ApplyOutcome};
pub use catalog::{SpellCatalog, SpellResolver};
pub use concentration::ConcentrationLedger;
pub use config::EffectConfig;
pub use effect::{CancelOutcome, DenyReason, Effect, EffectState};
pub use effect_list::{ChangeBatch, EffectList};
pub use error::{CatalogError, EffectError, HandlerError, HandlerResult};
pub use handler::EffectHandler;
pub use living::{
    EffectUpdate, Living, LivingEntity, LivingSpec, LogSink, Notice, NotificationSink, RecordingSink,
};
pub use resolver::{EffectProfile, RejectReason, Resolution};
pub use spell::{HandlerKind, Spell};
pub use types::{EffectGroup, EffectId, EntityId, Pool, RestoreVars, SourceTier, SpellId};
