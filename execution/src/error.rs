use thiserror::Error;

/// Failure of a match-engine operation.
///
/// Every variant renders a message that is safe to show to the originating client.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
    #[error("invalid token type: {0}")]
    InvalidToken(String),
    #[error("{0}")]
    Validation(String),
    #[error("lobby not found or game not available")]
    LobbyNotFound,
    #[error("you are not a participant of this lobby")]
    NotAParticipant,
    #[error("not your turn")]
    NotYourTurn,
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    #[error("invalid lobby state: {0}")]
    InvalidState(&'static str),
    #[error("you have already confirmed readiness")]
    AlreadyReady,
    #[error("you are already seated in lobby {0}")]
    AlreadySeated(String),
    #[error("you have not joined a lobby")]
    NotBound,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("no free lobby identifier")]
    LobbyIdsExhausted,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Coarse classification used for logging and propagation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    InsufficientFunds,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidToken(_) | Error::Validation(_) => ErrorKind::Validation,
            Error::LobbyNotFound | Error::NotAParticipant => ErrorKind::NotFound,
            Error::NotYourTurn
            | Error::PermissionDenied(_)
            | Error::InvalidState(_)
            | Error::AlreadyReady
            | Error::AlreadySeated(_)
            | Error::NotBound
            | Error::LobbyIdsExhausted => ErrorKind::StateConflict,
            Error::InsufficientFunds => ErrorKind::InsufficientFunds,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }
}
