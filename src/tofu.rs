//! Trust-on-first-use verification
//!
//! The first key a server presents at an address is trusted and recorded.
//! Later connections compare against that record; a changed key is handled
//! according to a [`MismatchPolicy`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StoreError};
use crate::trust_store::{Address, Fingerprint, TrustStore};

/// Result of comparing a presented key against the trust store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// No record existed; the presented key is now trusted
    FirstSeen,
    /// The presented key matches the record
    Match,
    /// The presented key differs from the record
    Mismatch { stored: Fingerprint },
}

/// What to do when a server presents a key other than the trusted one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Abort the connection
    #[default]
    Error,
    /// Continue, keeping the old record
    Ignore,
    /// Continue and trust the new key from now on
    Replace,
}

impl FromStr for MismatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(Self::Error),
            "ignore" => Ok(Self::Ignore),
            "replace" => Ok(Self::Replace),
            other => Err(Error::Config(format!(
                "unknown key mismatch policy {other:?} (expected error, ignore or replace)"
            ))),
        }
    }
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Ignore => "ignore",
            Self::Replace => "replace",
        })
    }
}

/// Compare `observed` with the record for `addr`
///
/// An address with no record is trusted on the spot: `observed` is stored
/// and the outcome is [`VerificationOutcome::FirstSeen`]. Otherwise the
/// store is left alone.
pub fn verify(
    store: &dyn TrustStore,
    addr: &Address,
    observed: &Fingerprint,
) -> std::result::Result<VerificationOutcome, StoreError> {
    match store.lookup(addr)? {
        None => {
            store.store(addr, observed)?;
            info!(address = %addr, fingerprint = %observed, "trusting new server key");
            Ok(VerificationOutcome::FirstSeen)
        }
        Some(stored) if &stored == observed => {
            debug!(address = %addr, "server key matches trusted key");
            Ok(VerificationOutcome::Match)
        }
        Some(stored) => {
            warn!(
                address = %addr,
                trusted = %stored,
                presented = %observed,
                "server key does not match trusted key"
            );
            Ok(VerificationOutcome::Mismatch { stored })
        }
    }
}

/// Handle a [`VerificationOutcome::Mismatch`] according to `policy`
pub fn apply_mismatch_policy(
    store: &dyn TrustStore,
    addr: &Address,
    stored: &Fingerprint,
    observed: &Fingerprint,
    policy: MismatchPolicy,
) -> Result<()> {
    match policy {
        MismatchPolicy::Error => Err(Error::KeyMismatch {
            address: addr.clone(),
            stored: stored.clone(),
            observed: observed.clone(),
        }),
        MismatchPolicy::Ignore => {
            warn!(address = %addr, "ignoring server key mismatch");
            Ok(())
        }
        MismatchPolicy::Replace => {
            store.forget(addr)?;
            store.store(addr, observed)?;
            info!(address = %addr, fingerprint = %observed, "replaced trusted server key");
            Ok(())
        }
    }
}
