use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{engine} rejected the request: {message}")]
    Rejected {
        engine: &'static str,
        message: String,
    },

    #[error(transparent)]
    Engine(#[from] anyhow::Error),

    #[error("still pending after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn rejected(engine: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            engine,
            message: message.into(),
        }
    }
}
