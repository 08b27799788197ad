//! Scope - 효과(effect) 소유 단위와 상태 머신

mod status;
mod table;

pub use status::ScopeStatus;
pub use table::ScopeId;

pub(crate) use table::{Effect, EffectId, ForkNode, RuntimeNode, ScopeKind, ScopeTable};
