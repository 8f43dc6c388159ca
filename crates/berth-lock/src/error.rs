//! Scope lock errors.

use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// `owner` holds `held`, which overlaps the requested path.
    #[error("cannot lock {requested}: {held} is held by {owner}")]
    Conflict {
        requested: String,
        held: String,
        owner: String,
    },

    #[error("invalid lock scope: {0}")]
    InvalidScope(String),

    #[error("lock table error: {0}")]
    State(#[from] berth_state::StateError),
}

impl LockError {
    /// Owner of the conflicting lock, if this is a conflict.
    pub fn owner(&self) -> Option<&str> {
        match self {
            LockError::Conflict { owner, .. } => Some(owner),
            _ => None,
        }
    }
}
