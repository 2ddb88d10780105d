use std::fmt::{self, Display};

/// Errors produced by model constructors and parse routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidId(String),
    UnknownContentKind(String),
    UnknownTokenState(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId(raw) => write!(f, "invalid id: {raw}"),
            ModelError::UnknownContentKind(raw) => {
                write!(
                    f,
                    "unknown content type '{raw}', expected one of media, structured, sequence"
                )
            }
            ModelError::UnknownTokenState(raw) => {
                write!(f, "unknown token state '{raw}'")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
