//! Channel errors

/// Result type for worklet channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The worklet was stopped by the host
    #[error("worklet channel is closed")]
    ChannelClosed,

    /// The worklet died without being asked to
    #[error("worklet is unavailable: {reason}")]
    PeerUnavailable { reason: String },

    /// The program failed to load or its top-level code raised an error
    #[error("worklet {entry_point} failed to start: {message}")]
    Startup { entry_point: String, message: String },

    /// `on_data` may be called once per worklet
    #[error("a data handler is already registered")]
    HandlerAlreadySet,
}
