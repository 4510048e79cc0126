//! Server start-up errors.

/// Failure to bring the HTTP listener up.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Any other listener I/O failure.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}
