use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix reserved for canonical state-provider names. Caller-supplied short
/// names must not carry it; the state manager prepends it during
/// normalization.
pub const RESERVED_PREFIX: &str = "urn:replistate:";

/// Characters escaped in short names. `%` itself is escaped, which keeps the
/// encoding injective; the URI delimiters keep canonical names safe to embed
/// in traces and paths.
const NAME_ESCAPE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\');

/// Normalized absolute identifier of a state provider, unique within a
/// replica. Constructed through [`StateProviderName::normalize`]; the escaping
/// round-trips, so the original short name is always recoverable for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateProviderName {
    canonical: String,
}

impl StateProviderName {
    /// Normalizes a caller-supplied short name into its canonical form.
    ///
    /// Rejects empty names and names that already carry the reserved prefix.
    pub fn normalize(short_name: &str) -> Result<Self, NamingError> {
        if short_name.is_empty() {
            return Err(NamingError::Empty);
        }
        if short_name.starts_with(RESERVED_PREFIX) {
            return Err(NamingError::ReservedPrefix {
                name: short_name.to_string(),
            });
        }
        let escaped = utf8_percent_encode(short_name, NAME_ESCAPE_SET);
        Ok(Self {
            canonical: format!("{RESERVED_PREFIX}{escaped}"),
        })
    }

    /// Wraps an already-canonical name, verifying the prefix. Used when names
    /// come back from the log or a backup manifest.
    pub fn from_canonical(canonical: impl Into<String>) -> Result<Self, NamingError> {
        let canonical = canonical.into();
        if !canonical.starts_with(RESERVED_PREFIX) {
            return Err(NamingError::MissingPrefix { name: canonical });
        }
        Ok(Self { canonical })
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Recovers the original short name by reversing the escaping.
    pub fn short_name(&self) -> Result<String, NamingError> {
        let suffix = &self.canonical[RESERVED_PREFIX.len()..];
        percent_decode_str(suffix)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .map_err(|_| NamingError::MalformedEscape {
                name: self.canonical.clone(),
            })
    }
}

impl fmt::Display for StateProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("state provider name must not be empty")]
    Empty,
    #[error("name {name:?} carries the reserved prefix {prefix:?}", prefix = RESERVED_PREFIX)]
    ReservedPrefix { name: String },
    #[error("canonical name {name:?} is missing the reserved prefix")]
    MissingPrefix { name: String },
    #[error("canonical name {name:?} contains a malformed escape sequence")]
    MalformedEscape { name: String },
}
