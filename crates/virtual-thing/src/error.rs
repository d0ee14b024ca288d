//! Engine-wide error type.
//!
//! Messages are qualified by the full path of the node that raised them and
//! grow one context line per node while an error travels up the tree.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed description or pointer, missing entry, wrong type,
    /// invalid date-time expression or state machine declaration.
    Fatal(String),
    /// A schema refused the value of a data write.
    Validation(String),
    /// A thing interaction (local or remote) failed.
    Interaction(String),
    /// The model is gone or was never started.
    Aborted(String),
}

impl Error {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Fatal error qualified by the node that raised it.
    pub fn fatal_at(source: &str, message: impl AsRef<str>) -> Self {
        Self::Fatal(qualified(source, message.as_ref()))
    }

    pub fn interaction(message: impl Into<String>) -> Self {
        Self::Interaction(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Fatal(message)
            | Self::Validation(message)
            | Self::Interaction(message)
            | Self::Aborted(message) => message,
        }
    }

    /// Prefix the message with the path of an enclosing node, keeping the kind.
    pub fn within(self, source: &str) -> Self {
        self.map_message(|message| qualified(source, message))
    }

    /// Prefix the message with a short headline, keeping the kind.
    pub fn context(self, headline: &str) -> Self {
        self.map_message(|message| format!("{headline}\n{message}"))
    }

    pub(crate) fn map_message(self, map: impl FnOnce(&str) -> String) -> Self {
        match self {
            Self::Fatal(message) => Self::Fatal(map(&message)),
            Self::Validation(message) => Self::Validation(map(&message)),
            Self::Interaction(message) => Self::Interaction(map(&message)),
            Self::Aborted(message) => Self::Aborted(map(&message)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Fatal(error.to_string())
    }
}

/// `"<source>:\n<message>"`, or just the message for an anonymous source.
pub fn qualified(source: &str, message: &str) -> String {
    if source.is_empty() {
        message.to_owned()
    } else {
        format!("{source}:\n{message}")
    }
}
