//! Per-measurement label sets.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MetricsError, MetricsResult};

/// A normalized set of `key=value` labels attached to one recorded value.
///
/// Keys are unique and sorted so equal label sets hash identically
/// regardless of the order callers listed them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeSet(Vec<(String, String)>);

impl AttributeSet {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Parse `key=value` tokens. A token without `=` is a caller error.
    ///
    /// The value is everything after the first `=`. A repeated key keeps
    /// its last value.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> MetricsResult<Self> {
        if tokens.is_empty() {
            return Ok(Self::empty());
        }

        let mut pairs = BTreeMap::new();
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| MetricsError::MalformedAttribute(token.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(MetricsError::EmptyAttributeKey(token.to_string()));
            }
            pairs.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self(pairs.into_iter().collect()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| self.0[idx].1.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sorts_and_normalizes() {
        let attrs = AttributeSet::parse(&["method=GET", "code = 200"]).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("code"), Some("200"));
        assert_eq!(attrs.get("method"), Some("GET"));
        assert_eq!(attrs.to_string(), "{code=200,method=GET}");
    }

    #[test]
    fn order_does_not_matter() {
        let a = AttributeSet::parse(&["a=1", "b=2"]).unwrap();
        let b = AttributeSet::parse(&["b=2", "a=1"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn value_may_contain_equals() {
        let attrs = AttributeSet::parse(&["query=a=b"]).unwrap();
        assert_eq!(attrs.get("query"), Some("a=b"));
    }

    #[test]
    fn missing_equals_is_an_error() {
        let err = AttributeSet::parse(&["method=GET", "oops"]).unwrap_err();
        assert_eq!(err, MetricsError::MalformedAttribute("oops".to_string()));
    }

    #[test]
    fn empty_key_is_an_error() {
        let err = AttributeSet::parse(&["=x"]).unwrap_err();
        assert_eq!(err, MetricsError::EmptyAttributeKey("=x".to_string()));
    }

    #[test]
    fn repeated_key_keeps_last() {
        let attrs = AttributeSet::parse(&["k=1", "k=2"]).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.get("k"), Some("2"));
    }
}
