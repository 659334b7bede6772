//! Request field multimap and binding rules.
//!
//! Query strings and form bodies are flattened into one ordered list of
//! key/value pairs. Lookups try the exact key first and fall back to a
//! case-insensitive match.

use std::str::FromStr;

use crate::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    pairs: Vec<(String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Every value bound to `key`, exact matches winning over case-folded ones
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        let exact: Vec<&str> = self
            .pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        self.pairs
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).into_iter().next()
    }

    /// Present and non-empty
    pub fn optional(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).map(str::to_string)
    }

    pub fn required(&self, key: &'static str) -> Result<String, ProtocolError> {
        self.optional(key).ok_or(ProtocolError::MissingField(key))
    }

    /// List field: `key[]`, then plain `key`, then indexed `key[0]`, `key[1]`, ...
    pub fn list(&self, key: &str) -> Vec<String> {
        let bracketed = self.get_all(&format!("{}[]", key));
        if !bracketed.is_empty() {
            return bracketed.into_iter().map(str::to_string).collect();
        }
        let plain = self.get_all(key);
        if !plain.is_empty() {
            return plain.into_iter().map(str::to_string).collect();
        }

        let prefix = format!("{}[", key.to_ascii_lowercase());
        let mut indexed: Vec<(usize, &str)> = self
            .pairs
            .iter()
            .filter_map(|(k, v)| {
                let lower = k.to_ascii_lowercase();
                let idx = lower.strip_prefix(&prefix)?.strip_suffix(']')?.parse().ok()?;
                Some((idx, v.as_str()))
            })
            .collect();
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, v)| v.to_string()).collect()
    }

    /// Boolean flag; absent or empty is false
    pub fn flag(&self, key: &'static str) -> Result<bool, ProtocolError> {
        match self.get(key) {
            None => Ok(false),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "" | "0" | "false" => Ok(false),
                "1" | "true" => Ok(true),
                _ => Err(ProtocolError::InvalidField {
                    field: key,
                    value: v.to_string(),
                }),
            },
        }
    }

    /// Numeric field; absent or empty is `None`
    pub fn number<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ProtocolError> {
        match self.optional(key) {
            None => Ok(None),
            Some(v) => v.trim().parse().map(Some).map_err(|_| ProtocolError::InvalidField {
                field: key,
                value: v,
            }),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        fields.extend(iter);
        fields
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Fields {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.push(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_exact_match_wins_over_case_fold() {
        let f = fields(&[("Target", "upper"), ("target", "lower")]);
        assert_eq!(f.get("target"), Some("lower"));
        assert_eq!(f.get("TARGET"), Some("upper"));
        assert_eq!(f.get("missing"), None);
    }

    #[test]
    fn test_list_forms() {
        let f = fields(&[("targets[]", "a"), ("targets[]", "b")]);
        assert_eq!(f.list("targets"), vec!["a", "b"]);

        let f = fields(&[("targets", "only")]);
        assert_eq!(f.list("targets"), vec!["only"]);

        let f = fields(&[("targets[1]", "second"), ("targets[0]", "first")]);
        assert_eq!(f.list("targets"), vec!["first", "second"]);

        assert!(fields(&[]).list("targets").is_empty());
    }

    #[test]
    fn test_flags() {
        let f = fields(&[("init", "1"), ("tree", "true"), ("cut", "0"), ("bad", "maybe")]);
        assert!(f.flag("init").unwrap());
        assert!(f.flag("tree").unwrap());
        assert!(!f.flag("cut").unwrap());
        assert!(!f.flag("absent").unwrap());
        assert!(matches!(f.flag("bad"), Err(ProtocolError::InvalidField { .. })));
    }

    #[test]
    fn test_numbers_and_required() {
        let f = fields(&[("cid", "42"), ("empty", ""), ("junk", "x1")]);
        assert_eq!(f.number::<u64>("cid").unwrap(), Some(42));
        assert_eq!(f.number::<u64>("empty").unwrap(), None);
        assert!(f.number::<u64>("junk").is_err());
        assert!(matches!(f.required("empty"), Err(ProtocolError::MissingField("empty"))));
    }
}
