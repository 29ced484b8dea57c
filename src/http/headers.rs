//! Ordered header storage shared by requests and responses.
//!
//! # Design Decisions
//! - Insertion order is preserved so serialized output is deterministic
//! - Names compare case-insensitively, original casing kept
//! - Re-inserting a name replaces the value in place (last value wins)

/// An ordered, case-insensitive `name → value` mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any earlier value for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a header value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.entries[index].1.as_str())
    }

    /// Remove a header, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|index| self.entries.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Overlay every entry of `other` on top of `self`.
    pub fn extend(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_wins_in_first_position() {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html");
        headers.insert("Host", "example.com");
        headers.insert("accept", "application/json");

        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(
            entries,
            vec![("Accept", "application/json"), ("Host", "example.com")]
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let headers: Headers = [("Content-Type", "text/plain")].into_iter().collect();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
        assert_eq!(headers.get("content-length"), None);
    }

    #[test]
    fn remove_and_extend() {
        let mut base: Headers = [("A", "1"), ("B", "2")].into_iter().collect();
        let overlay: Headers = [("b", "3"), ("C", "4")].into_iter().collect();

        base.extend(&overlay);
        assert_eq!(base.get("B"), Some("3"));
        assert_eq!(base.remove("a"), Some("1".to_string()));
        assert_eq!(base.len(), 2);
    }
}
