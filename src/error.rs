//! Error taxonomy shared by the gateway, loaders and the selection cascade.
//!
//! Fetch failures (`Network`, `UnexpectedStatus`, `NotFound`, `Task`) are rendered in
//! place of the panel that requested the data and never retried automatically.
//! `InvalidSelection` is a UI/programmer error: logged, never shown.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The gateway could not be reached at all.
    #[error("network error: {0}")]
    Network(String),

    /// The gateway answered with a non-success code or a body we could not decode.
    #[error("unexpected response ({status}): {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid selection: row {row} out of range for {len} items")]
    InvalidSelection { row: isize, len: usize },

    /// The background fetch panicked before producing a value.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Status code used for bodies that decoded as garbage despite a 2xx.
    pub const UNPARSEABLE: u16 = 0;

    pub fn unparseable(e: impl std::fmt::Display) -> Self {
        Self::UnexpectedStatus {
            status: Self::UNPARSEABLE,
            message: format!("could not decode response: {e}"),
        }
    }

    /// Message shown in a panel in place of the data it asked for.
    pub fn panel_message(&self) -> String {
        match self {
            Self::Network(msg) => format!("Could not reach Bitbucket: {msg}"),
            Self::UnexpectedStatus { status, message } if *status == Self::UNPARSEABLE => {
                format!("Bitbucket sent something unexpected: {message}")
            }
            Self::UnexpectedStatus { status, message } => {
                format!("Bitbucket returned HTTP {status}: {message}")
            }
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::InvalidSelection { .. } => self.to_string(),
            Self::Task(msg) => format!("Fetch crashed: {msg}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
