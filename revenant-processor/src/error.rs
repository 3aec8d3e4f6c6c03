use thiserror::Error;

/// Whether a failure should trigger a reconnect-with-backoff or stop
/// the processor for this agent outright. Most failures here are
/// retryable: a agent rebooting or a network blip shouldn't require
/// operator intervention, only a misconfigured peer key should.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("transport error: {0}")]
    Transport(#[from] revenant_transport::TransportError),
    #[error("journal error: {0}")]
    Journal(#[from] revenant_journal::JournalError),
    #[error("agent rejected RegisterSink: {0}")]
    RegisterSinkRejected(String),
    #[error("connect failed: {0}")]
    Io(#[from] std::io::Error),
    /// The configured peer key will never match; retrying can't help.
    #[error("peer key policy rejected the agent; will not retry: {0}")]
    Terminal(String),
}

impl ProcessorError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessorError::Terminal(_)) || matches!(self, ProcessorError::Transport(revenant_transport::TransportError::PeerRejected))
    }
}
