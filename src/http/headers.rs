//! HTTP header map with case-insensitive name lookup.

use std::fmt;

/// An order-preserving, case-insensitive header list.
///
/// Duplicate names are kept; [`get`](Headers::get) returns the first one.
///
/// # Examples
///
/// ```
/// use cat_cache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "image/jpeg");
/// headers.insert("Cache-Control", "no-store");
///
/// assert_eq!(headers.get("content-type"), Some("image/jpeg"));
/// assert!(headers.contains("CACHE-CONTROL"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every entry named `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.inner.push((name, value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Content-Type", "image/png");
        assert_eq!(h.get("content-type"), Some("image/png"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("image/png"));
        assert_eq!(h.get("accept"), None);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("Cache-Control", "max-age=60");
        h.insert("cache-control", "public");
        h.set("Cache-Control", "no-store");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("cache-control"), Some("no-store"));
    }

    #[test]
    fn wire_format() {
        let mut h = Headers::new();
        h.insert("X-Cache", "hit");
        h.insert("Content-Length", "0");
        assert_eq!(h.to_string(), "X-Cache: hit\r\nContent-Length: 0\r\n");
    }
}
