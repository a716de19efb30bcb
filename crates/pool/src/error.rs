use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] contun_transport::TransportError),

    #[error(transparent)]
    Proto(#[from] contun_proto::ProtoError),

    #[error("hub rejected handshake: {0:?}")]
    HandshakeRejected(String),

    #[error("hub closed during handshake")]
    HandshakeClosed,

    #[error("unexpected buffered data before streaming")]
    EarlyStreamData,
}

pub type Result<T> = std::result::Result<T, PoolError>;
