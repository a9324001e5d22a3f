//! Error taxonomy for the content core.

use crate::drivers::DriverInput;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The user's remaining storage budget was exhausted mid-stream.
    /// User-correctable; surfaced as-is.
    #[error("storage limit reached")]
    LimitReached,

    /// A driver was requested by name but is not registered.
    /// Configuration error, not retried.
    #[error("driver not found: {0}")]
    DriverNotFound(String),

    /// The requested driver does not declare the input mode it was asked
    /// to consume.
    #[error("input mode {input} not supported by driver: {driver}")]
    UnsupportedInput {
        driver: String,
        input: DriverInput,
    },

    /// A driver's declared input capabilities match none of the
    /// orchestrator's strategies. Registry and negotiation logic are out
    /// of sync; fatal.
    #[error("no usable input mode declared by driver: {0}")]
    DriverInputNotFound(String),

    /// Missing or invalid credential reference.
    #[error("not authorized")]
    NotAuthorized,

    #[error("not found: {0}")]
    NotFound(String),

    /// Object store failure, surfaced unmodified in message form.
    #[error("object store error: {0}")]
    Store(String),

    /// Record store (relational collaborator) failure.
    #[error("record store error: {0}")]
    Database(String),

    /// Network name-system failure during pointer resolution/publish.
    #[error("pointer resolution error: {0}")]
    Pointer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {0} fetching remote content")]
    HttpStatus(u16),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Built-in driver failure (decode, resize, unpack).
    #[error("driver error: {0}")]
    Driver(String),
}

impl Error {
    /// Maps an error surfaced through a byte stream back into the crate
    /// taxonomy, recovering a quota trip from its io wrapper.
    pub(crate) fn from_stream(err: std::io::Error) -> Self {
        if crate::quota::is_limit_reached(&err) {
            Error::LimitReached
        } else {
            Error::Io(err)
        }
    }
}
