use thiserror::Error;

/// The result type used throughout the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Broker reachability or protocol failure. Producers surface this to
    /// their caller; consumer loops log it and retry the read.
    #[error("broker transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A stream entry whose payload cannot be turned back into an envelope.
    /// Retrying cannot help; the consumer acks and drops it.
    #[error("envelope decode failed: {message}")]
    Decode { message: String },

    /// Group creation failed with something other than "already exists".
    /// Fatal at startup.
    #[error("stream topology setup failed: {message}")]
    Startup { message: String },

    /// Account store read or write failure. Treated as retryable by
    /// executors since the store may come back.
    #[error("account store error: {message}")]
    Accounts { message: String },
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    pub fn accounts(message: impl Into<String>) -> Self {
        Self::Accounts {
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
