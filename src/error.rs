use tokio_tungstenite::tungstenite;

/// Error returned by the interceptor to its callers.
///
/// Malformed frames never surface here: they are dropped inside the
/// parsing step and only counted in [`crate::bus::BusStats`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("interceptor is not initialized")]
    NotInitialized,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),
}

/// Error produced by the underlying realtime transport.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("transport closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(value: tungstenite::Error) -> Self {
        match value {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            tungstenite::Error::Url(_) | tungstenite::Error::Http(_) => {
                Self::Connect(value.to_string())
            }
            _ => Self::Io(value.to_string()),
        }
    }
}
