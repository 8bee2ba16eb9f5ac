//! Namespaced identifiers
//!
//! Identifiers key the registry, tag `or`/`cat`/`alt` branches, and name map
//! keys. They carry an optional namespace (`person/name`) so independent
//! spec sets can share a process without colliding.

use serde::de::{self, Deserialize, Deserializer};
use serde::{Serialize, Serializer};
use std::fmt;

/// A namespaced identifier (`ns/name` or bare `name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident {
    ns: Option<String>,
    name: String,
}

impl Ident {
    /// Create a qualified identifier
    pub fn qualified(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ns: Some(ns.into()),
            name: name.into(),
        }
    }

    /// Create an unqualified identifier
    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            ns: None,
            name: name.into(),
        }
    }

    /// Parse from `ns/name` or bare `name` form
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() => Self::qualified(ns, name),
            _ => Self::unqualified(s),
        }
    }

    /// The namespace, if qualified
    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    /// The name component
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this identifier carries a namespace
    pub fn is_qualified(&self) -> bool {
        self.ns.is_some()
    }

    /// Strip the namespace (`person/name` -> `name`)
    pub fn unqualify(&self) -> Ident {
        Ident::unqualified(self.name.clone())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Ident::parse(s)
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Ident::parse(&s)
    }
}

impl From<&Ident> for Ident {
    fn from(id: &Ident) -> Self {
        id.clone()
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(de::Error::custom("empty identifier"));
        }
        Ok(Ident::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified() {
        let id = Ident::parse("person/name");
        assert_eq!(id.ns(), Some("person"));
        assert_eq!(id.name(), "name");
        assert!(id.is_qualified());
        assert_eq!(id.to_string(), "person/name");
    }

    #[test]
    fn test_parse_unqualified() {
        let id = Ident::parse("name");
        assert_eq!(id.ns(), None);
        assert!(!id.is_qualified());
        assert_eq!(id.to_string(), "name");
    }

    #[test]
    fn test_unqualify() {
        let id = Ident::parse("person/name").unqualify();
        assert_eq!(id, Ident::unqualified("name"));
    }

    #[test]
    fn test_ordering() {
        let mut ids = vec![Ident::parse("b/x"), Ident::parse("a/y"), Ident::parse("a/x")];
        ids.sort();
        assert_eq!(ids[0], Ident::parse("a/x"));
        assert_eq!(ids[2], Ident::parse("b/x"));
    }
}
