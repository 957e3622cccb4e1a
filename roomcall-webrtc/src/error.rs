use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebrtcError {
    #[error("Transport engine not initialized")]
    NotInitialized,
    #[error("Local stream already attached")]
    StreamAttached,
    #[error(transparent)]
    Other(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for WebrtcError {
    fn from(err: anyhow::Error) -> Self {
        WebrtcError::Other(Box::new(err))
    }
}
