use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] contun_transport::TransportError),

    #[error(transparent)]
    Proto(#[from] contun_proto::ProtoError),
}

pub type Result<T> = std::result::Result<T, HubError>;
