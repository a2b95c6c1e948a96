//! Crate-level error type aggregating the per-module errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("broker: {0}")]
    Broker(#[from] crate::broker::Error),

    #[error("runtime: {0}")]
    Runtime(#[from] crate::runtime::Error),

    #[error("apps: {0}")]
    Apps(#[from] crate::apps::Error),

    #[error("status: {0}")]
    Status(#[from] crate::status::Error),
}

impl Error {
    /// Whether this is an availability failure worth only a debug log and a
    /// retry on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Broker(crate::broker::Error::Transient(_))
                | Error::Runtime(crate::runtime::Error::Transient(_))
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
