use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the maximum wire frame size")]
    FrameTooLarge(usize),
    #[error("noise protocol error: {0}")]
    Noise(#[from] snow::Error),
    #[error("peer's static key was rejected by the configured host-key policy")]
    PeerRejected,
    #[error("bincode decode error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("connection closed")]
    Closed,
}
