//! Instrument identifiers shared between client and server.
//!
//! An `InstrumentId` is an opaque, case-sensitive contract code such as `rb2501`.
//! The only normalization ever applied is trimming surrounding whitespace when a
//! raw string crosses into the system; after that, equality is exact.

use std::borrow::Borrow;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuoteError;

/// Validated, trimmed, non-empty instrument id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Trim `raw` and wrap it, rejecting empty input.
    pub fn parse(raw: &str) -> Result<Self, QuoteError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QuoteError::InvalidArgument(
                "instrumentId is required".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse ids from a reader, one or more per line separated by commas or spaces.
    ///
    /// Blank lines are skipped; duplicates are kept in input order.
    pub fn parse_list<R: BufRead>(reader: R) -> Result<Vec<Self>, QuoteError> {
        let mut ids = Vec::new();
        for line in reader.lines() {
            let line = line?;
            for token in line.split([',', ' ', '\t']) {
                if token.trim().is_empty() {
                    continue;
                }
                ids.push(Self::parse(token)?);
            }
        }
        Ok(ids)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstrumentId {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InstrumentId {
    type Error = QuoteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstrumentId> for String {
    fn from(id: InstrumentId) -> Self {
        id.0
    }
}

impl Borrow<str> for InstrumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for InstrumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
