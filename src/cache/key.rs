//! Cache key derivation.

use std::collections::BTreeMap;
use std::fmt;

/// A deterministic cache key such as `weather:city=paris:units=metric`.
///
/// Segments are trimmed, lowercased and escaped so that no value can
/// produce a separator of its own. Requests with the same parameters map to
/// the same key regardless of insertion order or letter case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    const SEPARATOR: char = ':';
    const ASSIGN: char = '=';

    /// Derive a key from a namespace and the parameters that shape the result.
    ///
    /// Each parameter contributes a `name=value` segment, in name order.
    pub fn derive(namespace: &str, params: &BTreeMap<String, String>) -> Self {
        let mut key = escape(&normalize(namespace));
        for (name, value) in params {
            key.push(Self::SEPARATOR);
            key.push_str(&escape(&normalize(name)));
            key.push(Self::ASSIGN);
            key.push_str(&escape(&normalize(value)));
        }
        Self(key)
    }

    /// Build a key from positional segments, e.g. `weather:paris:metric`.
    ///
    /// Only unambiguous when every caller passes the same number of segments
    /// in the same order.
    pub fn from_segments<S: AsRef<str>>(namespace: &str, segments: &[S]) -> Self {
        let mut key = escape(&normalize(namespace));
        for segment in segments {
            key.push(Self::SEPARATOR);
            key.push_str(&escape(&normalize(segment.as_ref())));
        }
        Self(key)
    }

    /// Use an already-normalized string as a key.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn normalize(part: &str) -> String {
    part.trim().to_lowercase()
}

/// Percent-encode the characters that carry structure in a key.
fn escape(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3a"),
            '=' => escaped.push_str("%3d"),
            _ => escaped.push(c),
        }
    }
    escaped
}
