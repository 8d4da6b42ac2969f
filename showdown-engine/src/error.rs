use showdown_core::{Side, WagerId, WagerStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Showdown core error: {0}")]
    Core(#[from] showdown_core::CoreError),

    #[error("Stake mismatch: wager requires {required}, got {offered}")]
    StakeMismatch { required: u64, offered: u64 },

    #[error("Stake must be a positive amount")]
    InvalidStake,

    #[error("Cannot join your own wager")]
    SelfJoin,

    #[error("Invalid transition: cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: WagerStatus,
    },

    #[error("Choice already made by {0}")]
    ChoiceAlreadyMade(Side),

    #[error("Wager {0} is not active")]
    WagerNotActive(WagerId),

    #[error("Lost concurrent update race on wager {0}")]
    Conflict(WagerId),

    #[error("Wager {0} is already settled")]
    AlreadySettled(WagerId),

    #[error("Player '{0}' is not part of this wager")]
    NotParticipant(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Retryable errors may succeed on a clean re-attempt; everything
    /// else is terminal for the operation that hit it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict(_)
                | EngineError::Core(showdown_core::CoreError::TransferFailed(_))
                | EngineError::Core(showdown_core::CoreError::VersionConflict { .. })
        )
    }
}
