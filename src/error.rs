//! Error types.
//!
//! Denials are not errors. A filter that rejects a request answers with a
//! `403` [`Response`](crate::Response) and the caller never sees an `Err`.
//! The types here surface the two failure classes that remain:
//!
//! - [`ConfigError`] — a stage could not be built. Returned at assembly time,
//!   before any request is served.
//! - [`ValidationError`] / [`BodyError`] — a single request could not be
//!   checked. Logged and collapsed into a denial by the filter that hit it.

use std::net::AddrParseError;

/// The crate-level error returned by fallible setup and serving operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A stage configuration that must not be turned into a running filter.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid ip range `{range}`: {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),

    #[error("invalid value for header `{name}`")]
    InvalidHeaderValue { name: String },

    #[error("unknown hmac provider `{0}`")]
    UnknownProvider(String),

    #[error("unknown signature encoding `{0}`")]
    UnknownEncoding(String),

    #[error("signature header name must not be empty")]
    MissingSignatureHeader,

    #[error("secret `{0}` could not be resolved")]
    UnresolvedSecret(String),
}

/// Why a single request's signature could not be checked.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("configured secret is empty")]
    EmptySecret,

    #[error("secret is not usable as an hmac key")]
    InvalidKey,

    #[error("missing header `{0}`")]
    MissingHeader(String),

    #[error("signature has length {0}, expected 45")]
    SignatureLength(usize),

    #[error("could not decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("invalid timestamp `{0}`")]
    Timestamp(String),
}

/// The request body stream failed before it could be buffered.
#[derive(Debug, thiserror::Error)]
#[error("could not read request body: {0}")]
pub struct BodyError(#[source] pub(crate) crate::request::BoxError);
