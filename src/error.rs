use thiserror::Error;

/// Errors surfaced by the compatibility layer.
///
/// Every failure is local to the call that produced it; nothing is retried
/// internally and there are no fatal states.
#[derive(Debug, Error)]
pub enum Error {
    /// The host transport refused or failed a send, for example when no
    /// context is listening on the other end.
    #[error("host transport rejected the message: {0}")]
    Transport(String),

    /// A page-scoped operation ran before `init_client` resolved the local
    /// page identity.
    #[error("page channel used before the identity handshake completed")]
    PageNotInitialised,

    /// Page-scoped messages are addressed by their `type` field; a payload
    /// without a string `type` cannot be routed.
    #[error("page-scoped messages must carry a string `type` field")]
    MissingType,

    /// A wire payload did not decode into the expected shape.
    #[error("malformed wire payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
