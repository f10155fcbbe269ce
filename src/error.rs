//! Error types for the hotserve development server

use crate::artifact::ModuleId;
use thiserror::Error;

/// Errors produced across the server and client halves.
#[derive(Debug, Error)]
pub enum Error {
    /// Client and server disagree about build state; incremental update is
    /// unsafe and the client must fall back to a full reload.
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    /// A hot update targeted a module id that was never loaded. Fatal for
    /// that swap: updates can only replace modules already in the cache.
    #[error("module not loaded: {0}")]
    ModuleNotLoaded(ModuleId),

    /// The notification channel to this session has been torn down.
    #[error("notification channel closed")]
    ChannelClosed,

    /// A requested artifact is missing from the output store.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// A manifest or message payload could not be decoded.
    #[error("malformed payload: {source}")]
    MalformedPayload {
        #[from]
        source: serde_json::Error,
    },

    /// The server was asked to serve or accept connections outside the
    /// Running state.
    #[error("server is not running")]
    NotRunning,

    /// IO error
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

/// Convenience Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
