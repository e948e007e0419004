use crate::effect::EffectState;
use crate::types::SpellId;

/// Contract violations of the effect lifecycle API.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error("effect {effect} can only be started once (state {state:?})")]
    NotArmed { effect: String, state: EffectState },

    #[error("effect {effect} is not active (state {state:?})")]
    NotActive { effect: String, state: EffectState },

    #[error("{owner} refused effect {effect}")]
    Rejected { owner: String, effect: String },

    #[error("concentration effect {effect} cannot be overwritten")]
    ConcentrationOverwrite { effect: String },

    #[error("{caster} cannot fund more concentration effects")]
    ConcentrationFull { caster: String },

    #[error("effect owner is gone")]
    OwnerGone,
}

/// Failure reported by an effect handler callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("effect owner is gone")]
    OwnerGone,

    #[error("{0}")]
    Failed(String),
}

pub type HandlerResult<T> = Result<T, HandlerError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("duplicate spell id {0}")]
    Duplicate(SpellId),

    #[error("not a directory: {0}")]
    NotADirectory(String),
}
