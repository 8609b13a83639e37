//! Error types for the Gemini client

use std::path::PathBuf;

use thiserror::Error;

use crate::trust_store::{Address, Fingerprint};

/// Failures of URI normalization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("invalid URI syntax: {0}")]
    Syntax(String),

    #[error("not a Gemini URI (scheme {scheme:?})")]
    NonGeminiUrl { scheme: String },

    #[error("Gemini URI scheme requires the authority component")]
    MissingAuthority,

    #[error("Gemini URI scheme does not support userinfo components")]
    UserinfoNotAllowed,
}

/// Failures of the persistent trust store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("trust store I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trust record for {address} is not a valid fingerprint: {content:?}")]
    Corrupt { address: Address, content: String },

    #[error("address {0} cannot name a trust record")]
    InvalidAddress(Address),
}

/// A string that is not 64 hex characters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid fingerprint {0:?}: expected 64 hex characters")]
pub struct InvalidFingerprint(pub String);

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("server key for {address} changed: trusted {stored}, presented {observed}")]
    KeyMismatch {
        address: Address,
        stored: Fingerprint,
        observed: Fingerprint,
    },

    #[error("request URI is {len} bytes, the limit is 1024")]
    RequestTooLong { len: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
