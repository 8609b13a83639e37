//! Gemini URI normalization
//!
//! Canonicalizes a user-supplied URI the way RFC 3986 section 6 describes,
//! narrowed by the Gemini scheme rules:
//!
//! - Scheme is lowercased and must be `gemini`
//! - Authority is mandatory and must not carry userinfo
//! - Host is percent-decoded, IDNA (Punycode) encoded and lowercased
//! - Port 1965 is the default and is dropped from the textual form
//! - Path dot segments are resolved; `..` never climbs above the root
//! - Path segments, query and fragment are percent-decoded and re-encoded so
//!   that only unreserved characters appear literally
//!
//! Normalizing an already canonical URI returns it unchanged.

use std::borrow::Cow;
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::UriError;
use crate::trust_store::Address;

/// The only scheme this client speaks
pub const GEMINI_SCHEME: &str = "gemini";

/// Port implied when a Gemini URI does not name one
pub const DEFAULT_PORT: u16 = 1965;

/// Everything except the unreserved set (`ALPHA / DIGIT / "-" / "." / "_" / "~"`)
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A Gemini URI in canonical form
///
/// Only [`normalize`] builds one, so every value upholds the canonical-form
/// rules. `Display` renders `gemini://host[:port]/path[?query][#fragment]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUri {
    /// ASCII, lowercase; IPv6 literals keep their brackets
    host: String,
    port: u16,
    /// Always starts with `/`
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl CanonicalUri {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `Some("")` when the URI ends in a bare `?`
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// `Some("")` when the URI ends in a bare `#`
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// The same URI with the fragment dropped, as sent in a request
    pub fn without_fragment(&self) -> CanonicalUri {
        CanonicalUri {
            fragment: None,
            ..self.clone()
        }
    }

    /// The (host, port) pair to connect to and to key trust records by
    pub fn address(&self) -> Address {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        Address::new(host, self.port)
    }
}

impl fmt::Display for CanonicalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GEMINI_SCHEME}://{}", self.host)?;
        if self.port != DEFAULT_PORT {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

impl FromStr for CanonicalUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Normalize a raw URI string into its canonical Gemini form
pub fn normalize(raw: &str) -> Result<CanonicalUri, UriError> {
    let cleaned = clean_input(raw);
    let parts = split(&cleaned)?;

    let scheme = parts.scheme.to_ascii_lowercase();
    if scheme != GEMINI_SCHEME {
        return Err(UriError::NonGeminiUrl { scheme });
    }

    let authority = parts.authority.unwrap_or_default();
    if authority.is_empty() {
        return Err(UriError::MissingAuthority);
    }
    if authority.contains('@') {
        return Err(UriError::UserinfoNotAllowed);
    }
    let (host, port) = parse_authority(authority)?;

    Ok(CanonicalUri {
        host,
        port,
        path: normalize_path(parts.path),
        query: parts.query.map(recode),
        fragment: parts.fragment.map(recode),
    })
}

/// Components of a URI reference as they appear in the text
#[derive(Debug, PartialEq, Eq)]
struct RawParts<'a> {
    scheme: &'a str,
    authority: Option<&'a str>,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

/// Drop leading control characters and spaces, and every tab or line break
fn clean_input(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim_start_matches(|c: char| c <= ' ');
    if trimmed.contains(['\t', '\r', '\n']) {
        Cow::Owned(trimmed.chars().filter(|c| !matches!(c, '\t' | '\r' | '\n')).collect())
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// Split per RFC 3986 appendix B, keeping track of which delimiters were present
fn split(input: &str) -> Result<RawParts<'_>, UriError> {
    let (rest, fragment) = match input.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (input, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };

    let (scheme, rest) = rest
        .split_once(':')
        .filter(|(scheme, _)| is_valid_scheme(scheme))
        .ok_or_else(|| UriError::Syntax(format!("missing scheme in {input:?}")))?;

    let (authority, path) = match rest.strip_prefix("//") {
        Some(after) => {
            let end = after.find('/').unwrap_or(after.len());
            (Some(&after[..end]), &after[end..])
        }
        None => (None, rest),
    };

    Ok(RawParts {
        scheme,
        authority,
        path,
        query,
        fragment,
    })
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Parse `host[:port]` (userinfo already rejected) into canonical host and port
fn parse_authority(authority: &str) -> Result<(String, u16), UriError> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (literal, after) = bracketed
            .split_once(']')
            .ok_or_else(|| UriError::Syntax("unterminated IPv6 literal".into()))?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':').ok_or_else(|| {
                UriError::Syntax(format!("unexpected text after IPv6 literal: {after:?}"))
            })?),
        };
        (normalize_ipv6(literal)?, port)
    } else {
        if authority.contains(['[', ']']) {
            return Err(UriError::Syntax(format!("misplaced bracket in authority {authority:?}")));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(UriError::MissingAuthority);
        }
        (normalize_host(host)?, port)
    };

    Ok((host, parse_port(port)?))
}

fn normalize_ipv6(literal: &str) -> Result<String, UriError> {
    let addr: Ipv6Addr = literal
        .parse()
        .map_err(|_| UriError::Syntax(format!("invalid IPv6 literal {literal:?}")))?;
    Ok(format!("[{addr}]"))
}

/// Percent-decode, IDNA-encode and lowercase a registered name
fn normalize_host(host: &str) -> Result<String, UriError> {
    let decoded = percent_decode_str(host)
        .decode_utf8()
        .map_err(|_| UriError::Syntax(format!("host {host:?} is not valid UTF-8")))?;
    let ascii = idna::domain_to_ascii(&decoded)
        .map_err(|_| UriError::Syntax(format!("invalid host name {decoded:?}")))?;
    if ascii.is_empty() {
        return Err(UriError::MissingAuthority);
    }
    Ok(ascii.to_ascii_lowercase())
}

/// An absent or empty port means the default
fn parse_port(port: Option<&str>) -> Result<u16, UriError> {
    match port {
        None | Some("") => Ok(DEFAULT_PORT),
        Some(digits) if digits.bytes().all(|b| b.is_ascii_digit()) => digits
            .parse()
            .map_err(|_| UriError::Syntax(format!("port {digits} out of range"))),
        Some(other) => Err(UriError::Syntax(format!("invalid port {other:?}"))),
    }
}

/// Resolve dot segments and canonicalize the encoding of every segment
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }

    let mut retained: Vec<Cow<'_, [u8]>> = Vec::new();
    for segment in path.strip_prefix('/').unwrap_or(path).split('/') {
        let decoded: Cow<'_, [u8]> = percent_decode_str(segment).into();
        if &*decoded == b"." {
            continue;
        }
        if &*decoded == b".." {
            // Past the root there is nothing to pop; the segment is dropped
            retained.pop();
            continue;
        }
        retained.push(decoded);
    }

    if retained.is_empty() {
        return "/".to_owned();
    }
    retained
        .iter()
        .map(|segment| format!("/{}", percent_encode(segment, COMPONENT)))
        .collect()
}

/// Decode then re-encode so only unreserved characters stay literal
fn recode(component: &str) -> String {
    let decoded: Cow<'_, [u8]> = percent_decode_str(component).into();
    percent_encode(&decoded, COMPONENT).to_string()
}
