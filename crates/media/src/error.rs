use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote fetch itself failed (network, status, timeout).
    #[error("media fetch failed: {context}: {source}")]
    Fetch {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The media reference is unusable before any fetch is attempted.
    #[error("invalid media reference: {message}")]
    InvalidReference { message: String },
}

impl Error {
    #[must_use]
    pub fn fetch<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Fetch {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidReference {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
