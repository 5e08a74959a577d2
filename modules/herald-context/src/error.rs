//! Errors raised while decoding wire-encoded context data.

use thiserror::Error;

/// A context header value could not be parsed.
#[derive(Debug, Error)]
pub enum ContextDecodeError {
    #[error("unknown context region tag '{0}'")]
    UnknownRegion(char),

    #[error("unknown context entry marker '{0}'")]
    UnknownMarker(char),

    #[error("truncated context entry: {entry:?}")]
    Truncated { entry: String },

    #[error("context entry has no key/value separator: {entry:?}")]
    MissingSeparator { entry: String },

    #[error("invalid base64 in context entry: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("context entry is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
