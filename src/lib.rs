//! # Gemini TOFU client
//!
//! Client for the Gemini protocol that identifies servers by trust on first
//! use instead of certificate authorities.
//!
//! ## URI normalization
//!
//! [`uri::normalize`] turns user input into the canonical form of a Gemini
//! URI (RFC 3986 section 6 plus the Gemini scheme rules). The canonical URI
//! names the address to connect to and is the exact request sent.
//!
//! ## Trust on first use
//!
//! - The first time an address is contacted, the SHA-256 fingerprint of the
//!   server's public key (SPKI DER) is recorded in the trust store
//! - Later connections must present the same key
//! - A changed key is an error by default; it can be ignored for one
//!   connection or replace the stored record ([`MismatchPolicy`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use gemini_tofu::{Client, ClientConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let uri = gemini_tofu::normalize("gemini://geminiprotocol.net")?;
//!     let client = Client::new(ClientConfig::default())?;
//!     let response = client.fetch(&uri)?;
//!     println!("{}", String::from_utf8_lossy(&response.body));
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod tls;
pub mod tofu;
pub mod trust_store;
pub mod uri;

pub use client::{Client, Response};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use tofu::{MismatchPolicy, VerificationOutcome};
pub use trust_store::{Address, FileTrustStore, Fingerprint, TrustStore};
pub use uri::{normalize, CanonicalUri};
