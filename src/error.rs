use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    /// Token endpoint rejected an exchange or refresh.
    AuthRejected { status: u16, message: String },
    /// No usable credentials; the authorization flow must be run.
    NotAuthorized,
    /// Redirect state matched no pending authorization attempt.
    UnknownAttempt,
    /// The authorization attempt was dropped before its redirect arrived.
    AttemptAbandoned,
    /// System id is not part of this entry.
    UnknownSystem(u32),
    InvalidConfig(String),
    Protocol(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::AuthRejected { status, message } => {
                write!(f, "token endpoint rejected request ({status}): {message}")
            }
            Error::NotAuthorized => write!(f, "not authorized"),
            Error::UnknownAttempt => write!(f, "unknown or already used authorization state"),
            Error::AttemptAbandoned => write!(f, "authorization attempt abandoned"),
            Error::UnknownSystem(id) => write!(f, "unknown system: {id}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
