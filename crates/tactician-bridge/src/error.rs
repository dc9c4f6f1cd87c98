//! Error types for the bridge binary.

use tactician_core::ConfigError;

/// Top-level error for the bridge binary.
///
/// Per-connection failures are logged and never reach `main`; only
/// startup failures and a broken listener do.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The listener could not bind.
    #[error("bind failed on {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Socket I/O failed.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An outbound frame could not be encoded.
    #[error("failed to encode response: {source}")]
    Encode {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
