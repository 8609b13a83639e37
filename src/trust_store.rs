//! Persistent trust records: which server key was seen at which address
//!
//! The on-disk layout is one directory with one file per address. The file
//! is named `<host>:<port>` and holds nothing but the 64-character lowercase
//! hex fingerprint. Directory and files are readable by the owner only.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{InvalidFingerprint, StoreError};

/// A server address, the identity key of a trust record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// SHA-256 of a server's SubjectPublicKeyInfo, as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    /// Accepts either hex case; the stored form is lowercase
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(InvalidFingerprint(s.to_owned()))
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-value storage of one fingerprint per address
///
/// Implementations must keep at most one record per address.
pub trait TrustStore {
    /// The trusted fingerprint for `addr`, if any
    fn lookup(&self, addr: &Address) -> Result<Option<Fingerprint>, StoreError>;

    /// Create or overwrite the record for `addr`
    fn store(&self, addr: &Address, fingerprint: &Fingerprint) -> Result<(), StoreError>;

    /// Remove the record for `addr`; a missing record is not an error
    fn forget(&self, addr: &Address) -> Result<(), StoreError>;

    /// Every record, ordered by host then port
    fn entries(&self) -> Result<Vec<(Address, Fingerprint)>, StoreError>;
}

/// Trust store backed by a directory of per-address files
#[derive(Debug, Clone)]
pub struct FileTrustStore {
    dir: PathBuf,
}

impl FileTrustStore {
    /// Open the store at `dir`, creating it (owner-only) if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        create_private_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        debug!(dir = %dir.display(), "opened trust store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, addr: &Address) -> Result<PathBuf, StoreError> {
        let host = addr.host.as_str();
        if host.is_empty() || host == "." || host == ".." || host.contains(['/', '\\', '\0']) {
            return Err(StoreError::InvalidAddress(addr.clone()));
        }
        Ok(self.dir.join(addr.to_string()))
    }
}

impl TrustStore for FileTrustStore {
    fn lookup(&self, addr: &Address) -> Result<Option<Fingerprint>, StoreError> {
        let path = self.record_path(addr)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        // Tolerate a trailing newline left by a hand edit
        content
            .trim_end()
            .parse()
            .map(Some)
            .map_err(|_| StoreError::Corrupt {
                address: addr.clone(),
                content,
            })
    }

    fn store(&self, addr: &Address, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let path = self.record_path(addr)?;
        write_private_file(&path, fingerprint.as_str().as_bytes())
            .map_err(|source| StoreError::Io { path, source })?;
        debug!(address = %addr, %fingerprint, "stored trust record");
        Ok(())
    }

    fn forget(&self, addr: &Address) -> Result<(), StoreError> {
        let path = self.record_path(addr)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(address = %addr, "removed trust record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn entries(&self) -> Result<Vec<(Address, Fingerprint)>, StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let Some(addr) = entry.file_name().to_str().and_then(parse_record_name) else {
                debug!(file = ?entry.file_name(), "skipping non-record file");
                continue;
            };
            if let Some(fingerprint) = self.lookup(&addr)? {
                records.push((addr, fingerprint));
            }
        }
        records.sort();
        Ok(records)
    }
}

fn parse_record_name(name: &str) -> Option<Address> {
    let (host, port) = name.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some(Address::new(host, port.parse().ok()?))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

/// Write `content` to a temporary file beside `path`, then rename it over
/// `path`. A failed write leaves any previous record untouched.
fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    // Created owner-only (0600 on unix)
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
