//! Zone identities and node names.
//!
//! A zone is addressed twice over: by its DNS apex name and by the
//! distinguished name of the directory container that backs it. Nodes
//! within a zone are addressed by their owner name relative to the apex.
//! Both are carried as small owned value types that are cheap to clone
//! and usable as map keys throughout the crate.

use core::fmt;

use serde::{Deserialize, Serialize};

//------------ ZoneIdentity --------------------------------------------------

/// The target zone of a synchronization run.
///
/// Couples the DNS apex name of the zone with the distinguished name of
/// the directory container holding its node objects. Comparison and
/// hashing cover both parts, so two zones with the same apex backed by
/// different partitions are distinct.
#[derive(
    Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Deserialize,
    Serialize,
)]
pub struct ZoneIdentity {
    apex: String,
    container_dn: String,
}

impl ZoneIdentity {
    /// Creates a zone identity from an apex name and its container DN.
    ///
    /// The apex name is stored in its canonical lowercase form without a
    /// trailing dot.
    pub fn new(
        apex: impl AsRef<str>,
        container_dn: impl Into<String>,
    ) -> Self {
        let apex = apex.as_ref().trim_end_matches('.').to_ascii_lowercase();
        ZoneIdentity {
            apex,
            container_dn: container_dn.into(),
        }
    }

    /// Returns the apex name of the zone.
    pub fn apex(&self) -> &str {
        &self.apex
    }

    /// Returns the DN of the directory container backing the zone.
    pub fn container_dn(&self) -> &str {
        &self.container_dn
    }
}

impl fmt::Display for ZoneIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.apex)
    }
}

//------------ NodeName ------------------------------------------------------

/// The owner name of a zone node, relative to the zone apex.
///
/// Stored in canonical form: ASCII-lowercased, no trailing dot. The apex
/// itself is represented by the conventional `@`.
#[derive(
    Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Deserialize,
    Serialize,
)]
pub struct NodeName(String);

impl NodeName {
    /// The name representing the zone apex.
    pub fn apex() -> Self {
        NodeName("@".into())
    }

    /// Creates a node name, canonicalizing its form.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim_end_matches('.');
        if name.is_empty() {
            return Self::apex();
        }
        NodeName(name.to_ascii_lowercase())
    }

    /// Returns whether this is the apex name.
    pub fn is_apex(&self) -> bool {
        self.0 == "@"
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        NodeName::new(name)
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zone_identity_canonicalizes_the_apex() {
        let zone = ZoneIdentity::new("Example.COM.", "DC=example.com,CN=Dns");
        assert_eq!(zone.apex(), "example.com");
        assert_eq!(zone.container_dn(), "DC=example.com,CN=Dns");
    }

    #[test]
    fn zones_with_distinct_containers_are_distinct() {
        let a = ZoneIdentity::new("example.com", "DC=example.com,CN=A");
        let b = ZoneIdentity::new("example.com", "DC=example.com,CN=B");
        assert_ne!(a, b);
    }

    #[test]
    fn node_names_canonicalize() {
        assert_eq!(NodeName::new("WWW").as_str(), "www");
        assert_eq!(NodeName::new("host."), NodeName::new("host"));
        assert!(NodeName::new("").is_apex());
        assert!(NodeName::new("@").is_apex());
        assert!(!NodeName::new("www").is_apex());
    }
}
