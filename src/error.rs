use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("SIP parse error: {0}")]
    ParseError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("SDP error: {0}")]
    SdpError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("ISUP error: {0}")]
    IsupError(String),

    #[error("Transmit error: {0}")]
    TransmitError(String),

    #[error("Channel send error: {0}")]
    ChannelSendError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Error: {0}")]
    Error(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelSendError(e.to_string())
    }
}
