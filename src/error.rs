use thiserror::Error;

use crate::sync::lamports_bakery::MAX_PARTICIPANTS;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bakery needs between 1 and {max} participants, got {0}", max = MAX_PARTICIPANTS)]
    ParticipantCount(usize),

    #[error("participant {id} out of range for a bakery of {n}")]
    ParticipantId { id: usize, n: usize },

    #[error("failed to spawn delegation server")]
    Spawn(#[from] std::io::Error),

    #[error("delegation server is shut down")]
    ShutDown,

    #[error("task discarded before it ran")]
    Discarded,

    #[error("delegated work panicked: {message}")]
    WorkPanicked { message: String },
}
