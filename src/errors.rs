use thiserror::Error;

/// Errors produced while parsing UCI input. All of these are recovered in
/// the main loop: the offending line is reported on stderr and ignored.
#[derive(Debug, Error)]
pub enum UciError {
    #[error("ParseGo: {0}")]
    ParseGo(String),
    #[error("ParseFen: {0}")]
    ParseFen(#[from] FenError),
    #[error("ParseMove: {0}")]
    ParseMove(String),
    #[error("UnexpectedCommandTermination: {0}")]
    UnexpectedCommandTermination(String),
    #[error("InvalidFormat: {0}")]
    InvalidFormat(String),
    #[error("UnknownCommand: {0}")]
    UnknownCommand(String),
}

#[derive(Debug, Error)]
pub enum FenError {
    #[error("FEN has {0} fields, expected at least 4")]
    MissingFields(usize),
    #[error("invalid halfmove clock: {0:?}")]
    InvalidHalfmoveClock(String),
    #[error("{0}")]
    Rejected(chess::Error),
}

impl From<chess::Error> for FenError {
    fn from(e: chess::Error) -> Self {
        FenError::Rejected(e)
    }
}
