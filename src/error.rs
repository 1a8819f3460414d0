// Error taxonomy for a single user-issued command. Every variant aborts the
// command it was raised in; none of them stops the interactive loop.

use std::path::PathBuf;
use thiserror::Error;

use crate::anonymize::AnonymizeError;
use crate::codec::DecodeError;
use crate::records::ParseError;

#[derive(Debug, Error)]
pub enum CommandError {
    /// The service answered, but not with 200. Covers 400/500 (with the
    /// service's message) and a non-terminal status left over after retries.
    #[error("request to {url} failed with status code {status}")]
    Rejected {
        status: u16,
        url: String,
        message: Option<String>,
    },

    #[error("request to {url} could not be completed: {cause}")]
    Transport { url: String, cause: String },

    #[error("local file '{}' does not exist", .0.display())]
    FileNotFound(PathBuf),

    #[error("'{0}' is not a valid id")]
    InvalidId(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A 200 answer whose image payload is not valid transfer text.
    #[error("payload from {url} could not be decoded: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },

    /// JSON exchanged with `url` did not have the expected shape.
    #[error("body exchanged with {url} is unusable: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Anonymize(#[from] AnonymizeError),
}

impl CommandError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CommandError::Io {
            path: path.into(),
            source,
        }
    }

    /// URL of the request this error belongs to, if it got that far.
    pub fn url(&self) -> Option<&str> {
        match self {
            CommandError::Rejected { url, .. }
            | CommandError::Transport { url, .. }
            | CommandError::Decode { url, .. }
            | CommandError::Parse { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Local failures never got as far as a request URL.
    pub fn is_local(&self) -> bool {
        self.url().is_none()
    }
}
