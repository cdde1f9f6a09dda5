use thiserror::Error;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Classified failure kinds raised before a file reaches the transfer pool.
///
/// Per-stage failures inside the pool carry their stage name instead; these
/// cover the up-front checks that abort a file (or the whole run) early.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("input error: {0}")]
    Input(String),

    #[error("remote object key too long: {got} bytes (max {max})")]
    RemoteKeyTooLong { got: usize, max: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
